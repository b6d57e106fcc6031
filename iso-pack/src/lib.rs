use std::fmt::Debug;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use config::{get_progress_bar, Strand};
use flate2::read::MultiGzDecoder;
use hashbrown::HashMap;
use log::{info, warn};
use rayon::prelude::*;

pub mod index;
pub mod locus;
pub mod record;

pub use index::LocusIndex;
pub use locus::{cluster, cluster_genes, merge_loci, Gene, Locus, Span, SuperLocus};
pub use record::{Bed12, GenePred};

pub type GenePredMap = HashMap<String, Vec<GenePred>>;
pub type GeneMap = HashMap<String, Vec<Gene>>;

/// open a plain or gzipped file as a buffered reader
pub fn open<P: AsRef<Path> + Debug>(file: P) -> Result<Box<dyn Read + Send>> {
    let handle = File::open(&file).with_context(|| format!("Cannot open {:?}", file))?;

    let is_gz = file
        .as_ref()
        .extension()
        .is_some_and(|ext| ext == "gz");

    if is_gz {
        Ok(Box::new(MultiGzDecoder::new(BufReader::new(handle))))
    } else {
        Ok(Box::new(BufReader::new(handle)))
    }
}

fn reader<P: AsRef<Path> + Debug>(file: P) -> Result<String> {
    let mut contents = String::new();
    open(&file)?
        .read_to_string(&mut contents)
        .with_context(|| format!("Cannot read {:?}", file))?;

    Ok(contents)
}

pub fn par_reader<P: AsRef<Path> + Debug + Sync + Send>(files: Vec<P>) -> Result<String> {
    let contents = files
        .par_iter()
        .map(|path| {
            let mut content = reader(path)?;
            if !content.is_empty() && !content.ends_with('\n') {
                content.push('\n');
            }
            Ok(content)
        })
        .collect::<Result<Vec<String>>>()?;

    Ok(contents.concat())
}

fn unpack<P: AsRef<Path> + Debug + Sync + Send>(files: Vec<P>, is_ref: bool) -> Result<GenePredMap> {
    let contents = par_reader(files)?;
    let tracks = parse_tracks(&contents, is_ref)?;

    Ok(tracks)
}

fn parse_tracks(contents: &str, is_ref: bool) -> Result<GenePredMap> {
    let pb = get_progress_bar(contents.lines().count() as u64, "Parsing BED12 files");
    let (mut tracks, skipped) = contents
        .par_lines()
        .filter(|x| !x.starts_with('#') && !x.trim().is_empty())
        .fold(
            || (HashMap::new(), 0usize),
            |(mut acc, mut skipped): (GenePredMap, usize), line| {
                match Bed12::read(line, is_ref) {
                    Ok(record) => acc.entry(record.chrom.clone()).or_default().push(record),
                    Err(e) => {
                        warn!("Skipping malformed BED12 line ({}): {}", e, line);
                        skipped += 1;
                    }
                }
                pb.inc(1);
                (acc, skipped)
            },
        )
        .reduce(
            || (HashMap::new(), 0usize),
            |(mut acc, a), (map, b)| {
                for (k, v) in map {
                    acc.entry(k).or_insert_with(Vec::new).extend(v);
                }
                (acc, a + b)
            },
        );

    tracks.par_iter_mut().for_each(|(_, v)| {
        v.par_sort_unstable_by(|a, b| {
            a.start
                .cmp(&b.start)
                .then(b.end.cmp(&a.end))
                .then(a.name.cmp(&b.name))
        });
    });

    pb.finish_and_clear();
    info!(
        "Records parsed: {} ({} skipped)",
        tracks.values().map(Vec::len).sum::<usize>(),
        skipped
    );

    Ok(tracks)
}

/// Group the transcripts of every chromosome into genes: by the optional
/// gene column when present, otherwise by same-strand span overlap.
pub fn assemble_genes(tracks: GenePredMap) -> GeneMap {
    tracks
        .into_par_iter()
        .map(|(chrom, records)| {
            let mut named: HashMap<(String, Strand), Vec<Arc<GenePred>>> = HashMap::new();
            let mut unnamed: HashMap<Strand, Vec<Arc<GenePred>>> = HashMap::new();

            for tx in records {
                match tx.gene.clone() {
                    Some(gene) => named.entry((gene, tx.strand)).or_default().push(Arc::new(tx)),
                    None => unnamed.entry(tx.strand).or_default().push(Arc::new(tx)),
                }
            }

            let mut genes: Vec<Gene> = named
                .into_iter()
                .filter_map(|((id, _), txs)| Gene::new(id, txs))
                .collect();

            for (_, txs) in unnamed {
                for group in cluster(txs) {
                    let id = group[0].name.clone();
                    genes.extend(Gene::new(id, group));
                }
            }

            genes.sort_by(|a, b| {
                a.start
                    .cmp(&b.start)
                    .then(a.end.cmp(&b.end))
                    .then(a.id.cmp(&b.id))
            });

            (chrom, genes)
        })
        .collect()
}

/// Load annotation files and partition them into indexed, disjoint loci.
pub fn packloci<T: AsRef<Path> + Debug + Send + Sync>(files: Vec<T>) -> Result<LocusIndex> {
    info!("Packing annotation into loci...");
    let tracks = unpack(files, true)?;

    if tracks.is_empty() {
        bail!("No transcripts found in annotation");
    }

    let genes = assemble_genes(tracks);
    let n_genes: usize = genes.values().map(Vec::len).sum();

    let loci = genes
        .into_par_iter()
        .map(|(chrom, genes)| (chrom, cluster_genes(genes)))
        .collect::<HashMap<String, Vec<Locus>>>();

    let index = LocusIndex::new(loci)?;
    let supers = index
        .chroms()
        .iter()
        .flat_map(|chrom| index.loci(chrom))
        .filter(|l| l.is_super())
        .count();

    info!(
        "Genes: {}, loci: {} ({} super-loci), transcripts: {}",
        n_genes,
        index.len(),
        supers,
        index.n_transcripts()
    );

    Ok(index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    const ANNOTATION: &str = "\
chr1\t1000\t2500\tA\t0\t+\t1000\t2500\t0\t2\t500,500,\t0,1000,\n\
chr1\t1000\t4000\tB\t0\t+\t1000\t4000\t0\t2\t500,1000,\t0,2000,\n\
chr1\t3500\t5000\tC\t0\t-\t3500\t5000\t0\t1\t1500,\t0,\n\
chr1\t9000\t9500\tD\t0\t+\t9000\t9500\t0\t1\t500,\t0,\n\
chr2\t100\t200\tE\t0\t+\t100\t200\t0\t1\t100,\t0,\n\
broken line\n";

    #[test]
    fn test_parse_tracks_skips_malformed() {
        let tracks = parse_tracks(ANNOTATION, true).unwrap();

        assert_eq!(tracks.len(), 2);
        assert_eq!(tracks["chr1"].len(), 4);
        assert_eq!(tracks["chr2"].len(), 1);
    }

    #[test]
    fn test_assemble_genes_by_overlap() {
        let tracks = parse_tracks(ANNOTATION, true).unwrap();
        let genes = assemble_genes(tracks);

        let ids: Vec<&str> = genes["chr1"].iter().map(|g| g.id.as_str()).collect();
        assert_eq!(ids, vec!["A", "C", "D"]);
        assert_eq!(genes["chr1"][0].transcripts.len(), 2);
    }

    #[test]
    fn test_assemble_genes_by_column() {
        let content = "\
chr1\t0\t100\tt1\t0\t+\t0\t100\t0\t1\t100,\t0,\tG1\n\
chr1\t500\t600\tt2\t0\t+\t500\t600\t0\t1\t100,\t0,\tG1\n\
chr1\t50\t150\tt3\t0\t+\t50\t150\t0\t1\t100,\t0,\tG2\n";
        let genes = assemble_genes(parse_tracks(content, true).unwrap());

        assert_eq!(genes["chr1"].len(), 2);
        assert_eq!(genes["chr1"][0].id, "G1");
        assert_eq!((genes["chr1"][0].start, genes["chr1"][0].end), (0, 600));
    }

    #[test]
    fn test_packloci_from_files() {
        let dir = tempfile::tempdir().unwrap();
        let plain = dir.path().join("a.bed");
        let gz = dir.path().join("b.bed.gz");

        let (head, tail) = ANNOTATION.split_at(ANNOTATION.find("chr1\t9000").unwrap());
        std::fs::write(&plain, head).unwrap();

        let mut encoder = GzEncoder::new(File::create(&gz).unwrap(), Compression::default());
        encoder.write_all(tail.as_bytes()).unwrap();
        encoder.finish().unwrap();

        let index = packloci(vec![plain, gz]).unwrap();

        assert_eq!(index.len(), 3);
        assert_eq!(index.loci("chr1").len(), 2);

        let first = &index.loci("chr1")[0];
        assert!(first.is_super());
        assert!(first.is_antisense());
        assert_eq!(first.n_transcripts(), 3);
        assert_eq!((first.signed_start(), first.signed_end()), (1001, 5000));
    }

    #[test]
    fn test_packloci_empty_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.bed");
        std::fs::write(&path, "# header only\n").unwrap();

        assert!(packloci(vec![path]).is_err());
    }
}
