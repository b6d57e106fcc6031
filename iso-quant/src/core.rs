use std::sync::Arc;

use anyhow::Result;
use log::{info, warn};
use packbed::packloci;

use crate::bias::{BiasOracle, ProfileMatrix, UniformProfile};
use crate::cli::Args;
use crate::cursor::ReadCursor;
use crate::params::QuantParams;
use crate::scheduler::{schedule, RunContext};
use crate::solver::MiniLpSolver;
use crate::utils::{inc, write_results, StatsSnapshot};

/// Quantify every annotated transcript from a sorted read alignment and
/// write expression, locus and run summaries to `args.outdir`.
pub fn quantify(args: Args) -> Result<StatsSnapshot> {
    let params = QuantParams::from(&args);

    let index = packloci(args.annotation.clone())?;
    info!(
        "Indexed {} loci ({} transcripts)",
        index.len(),
        index.n_transcripts()
    );

    let oracle: Arc<dyn BiasOracle> = match args.profile.as_ref() {
        Some(profile) => Arc::new(ProfileMatrix::from_path(profile)?),
        None => Arc::new(UniformProfile),
    };

    if let Some(dir) = params.debug_lp.as_ref() {
        std::fs::create_dir_all(dir)?;
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(params.threads)
        .build()?;

    let ctx = RunContext::new(params, oracle, Arc::new(MiniLpSolver));
    let mut cursor = ReadCursor::from_path(&args.reads)?;

    let results = schedule(&index, cursor.by_ref(), &ctx, &pool)?;

    if cursor.skipped > 0 {
        warn!("Skipped {} malformed read records", cursor.skipped);
    }
    inc(&ctx.stats.reads_skipped, cursor.skipped as u64);

    let stats = ctx.stats.snapshot();
    if stats.strand_collapsed > 0 {
        warn!(
            "{} loci had reads on one strand only and were fitted unstranded",
            stats.strand_collapsed
        );
    }
    info!(
        "Loci: {} solved, {} trivial, {} skipped, {} unsolved",
        stats.solved, stats.trivial, stats.skipped, stats.unsolved
    );

    write_results(&results, &stats, &args.outdir)?;
    info!("Results written to {:?}", args.outdir);

    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use config::{EXPRESSION, LOCI, STATS};
    use std::path::Path;

    fn bed(chrom: &str, name: &str, strand: char, blocks: &[(u64, u64)]) -> String {
        let start = blocks[0].0;
        let end = blocks[blocks.len() - 1].1;
        let sizes: Vec<String> = blocks.iter().map(|(s, e)| (e - s).to_string()).collect();
        let starts: Vec<String> = blocks.iter().map(|(s, _)| (s - start).to_string()).collect();

        format!(
            "{chrom}\t{start}\t{end}\t{name}\t0\t{strand}\t{start}\t{end}\t0\t{}\t{},\t{},\n",
            blocks.len(),
            sizes.join(","),
            starts.join(",")
        )
    }

    fn write(dir: &Path, name: &str, lines: Vec<String>) -> std::path::PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, lines.concat()).unwrap();
        path
    }

    #[test]
    fn test_quantify_end_to_end() {
        let dir = tempfile::tempdir().unwrap();

        let annotation = write(
            dir.path(),
            "ref.bed",
            vec![
                bed("chr1", "A", '+', &[(1000, 1500), (2000, 2500)]),
                bed("chr1", "B", '+', &[(1000, 1500), (3000, 4000)]),
                bed("chr1", "C", '-', &[(8000, 9000)]),
                bed("chr2", "D", '+', &[(100, 900)]),
            ],
        );

        let mut reads = Vec::new();
        for i in 0..20 {
            reads.push(bed("chr1", &format!("s{i}"), '+', &[(1100, 1101)]));
        }
        for i in 0..10 {
            reads.push(bed("chr1", &format!("a{i}"), '+', &[(2100, 2101)]));
        }
        for i in 0..10 {
            reads.push(bed("chr1", &format!("b{i}"), '+', &[(3100, 3101)]));
        }
        reads.push(bed("chr1", "c0", '-', &[(8500, 8501)]));
        reads.push("broken\tline\n".to_string());
        let reads = write(dir.path(), "reads.bed", reads);

        let outdir = dir.path().join("out");
        let args = Args::parse_from([
            "iso-quant",
            "-a",
            annotation.to_str().unwrap(),
            "-r",
            reads.to_str().unwrap(),
            "-o",
            outdir.to_str().unwrap(),
            "-t",
            "2",
            "-l",
            "1",
            "--unstranded",
        ]);

        let stats = quantify(args).unwrap();

        assert_eq!(stats.loci, 3);
        assert_eq!(stats.solved, 1);
        assert_eq!(stats.trivial, 1);
        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.reads, 41);
        assert_eq!(stats.reads_skipped, 1);

        let expression = std::fs::read_to_string(outdir.join(EXPRESSION)).unwrap();
        let lines: Vec<&str> = expression.lines().collect();
        assert_eq!(lines.len(), 5);
        assert!(lines[0].starts_with("locus\ttranscript"));
        // same-strand overlapping transcripts without a gene column form one gene
        assert!(lines[1].starts_with("A\tA\tA\t1000\t"));
        assert!(lines[3].starts_with("C\tC\tC\t"));

        let loci = std::fs::read_to_string(outdir.join(LOCI)).unwrap();
        assert_eq!(loci.lines().count(), 4);
        assert!(outdir.join(STATS).exists());
    }

    #[test]
    fn test_quantify_missing_annotation_fails() {
        let dir = tempfile::tempdir().unwrap();
        let empty = write(dir.path(), "ref.bed", vec![]);
        let reads = write(dir.path(), "reads.bed", vec![]);

        let args = Args::parse_from([
            "iso-quant",
            "-a",
            empty.to_str().unwrap(),
            "-r",
            reads.to_str().unwrap(),
            "-o",
            dir.path().join("out").to_str().unwrap(),
        ]);

        assert!(quantify(args).is_err());
    }
}
