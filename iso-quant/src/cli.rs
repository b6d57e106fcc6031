use clap::{self, Parser};
use config::{ArgCheck, DEFAULT_LOWER_COST_BOUND, DEFAULT_MIN_EDGE_LENGTH};
use std::path::PathBuf;

use crate::params::{CostBounds, CostModel, QuantParams};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    #[arg(
        short = 'a',
        long = "annotation",
        required = true,
        value_name = "PATHS",
        value_delimiter = ',',
        num_args = 1..,
        help = "Paths to reference BED12 annotation file(s) delimited by comma"
    )]
    pub annotation: Vec<PathBuf>,

    #[arg(
        short = 'r',
        long = "reads",
        required = true,
        value_name = "PATH",
        help = "Path to coordinate-sorted BED12 read alignments"
    )]
    pub reads: PathBuf,

    #[arg(
        short = 'o',
        long = "outdir",
        required = false,
        value_name = "PATH",
        default_value = "iso-quant",
        help = "Output directory"
    )]
    pub outdir: PathBuf,

    #[arg(
        short = 't',
        long = "threads",
        help = "Number of threads",
        value_name = "THREADS",
        default_value_t = num_cpus::get()
    )]
    pub threads: usize,

    #[arg(
        long = "paired-end",
        help = "Treat reads named <fragment>/1 and <fragment>/2 as mates",
        default_value_t = false
    )]
    pub paired_end: bool,

    #[arg(
        long = "unstranded",
        help = "Ignore read orientation and sum both directions per edge",
        default_value_t = false
    )]
    pub unstranded: bool,

    #[arg(
        long = "min-edge-length",
        help = "Edges shorter than this are left out of the model",
        value_name = "BASES",
        default_value_t = DEFAULT_MIN_EDGE_LENGTH
    )]
    pub min_edge_length: u64,

    #[arg(
        short = 'l',
        long = "read-length",
        help = "Read length used for bias fractions [default: most frequent aligned length per locus]",
        value_name = "BASES"
    )]
    pub read_length: Option<u64>,

    #[arg(
        long = "lower-cost-bound",
        help = "Largest share of an observed count the model may leave unexplained",
        value_name = "FLOAT",
        default_value_t = DEFAULT_LOWER_COST_BOUND
    )]
    pub lower_cost_bound: f64,

    #[arg(
        long = "upper-cost-bound",
        help = "Largest share of an observed count the model may overshoot [default: unbounded]",
        value_name = "FLOAT"
    )]
    pub upper_cost_bound: Option<f64>,

    #[arg(
        long = "cost-model",
        help = "Penalty per unit of deviation",
        value_enum,
        default_value_t = CostModel::Linear
    )]
    pub cost_model: CostModel,

    #[arg(
        long = "allow-partial",
        help = "Route reads that only partially overlap a locus",
        default_value_t = false
    )]
    pub allow_partial: bool,

    #[arg(
        short = 'p',
        long = "profile",
        required = false,
        value_name = "PATH",
        help = "Path to positional bias profile [TSV: max_length, strand, weights]"
    )]
    pub profile: Option<PathBuf>,

    #[arg(
        long = "debug-lp",
        required = false,
        value_name = "PATH",
        help = "Directory where every locus model is written in LP format"
    )]
    pub debug_lp: Option<PathBuf>,

    #[arg(
        short = 'v',
        long = "verbose",
        help = "Log per-locus state transitions",
        default_value_t = false
    )]
    pub verbose: bool,
}

impl ArgCheck for Args {
    fn get_annotation(&self) -> &Vec<PathBuf> {
        &self.annotation
    }

    fn get_reads(&self) -> &PathBuf {
        &self.reads
    }

    fn get_profile(&self) -> Option<&PathBuf> {
        self.profile.as_ref()
    }
}

impl From<&Args> for QuantParams {
    fn from(args: &Args) -> Self {
        QuantParams {
            paired_end: args.paired_end,
            strand_aware: !args.unstranded,
            min_edge_length: args.min_edge_length,
            read_length: args.read_length,
            cost_bounds: CostBounds {
                lower: args.lower_cost_bound,
                upper: args.upper_cost_bound,
            },
            cost_model: args.cost_model,
            require_containment: !args.allow_partial,
            threads: args.threads.max(config::MIN_THREADS),
            debug_lp: args.debug_lp.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_defaults() {
        let args = Args::parse_from(["iso-quant", "-a", "a.bed,b.bed", "-r", "reads.bed"]);
        let params = QuantParams::from(&args);

        assert_eq!(args.annotation.len(), 2);
        assert_eq!(args.outdir, PathBuf::from("iso-quant"));
        assert!(params.strand_aware);
        assert!(params.require_containment);
        assert!(!params.paired_end);
        assert_eq!(params.read_length, None);
        assert_eq!(params.cost_bounds, CostBounds::default());
        assert_eq!(params.cost_model, CostModel::Linear);
    }

    #[test]
    fn test_args_overrides() {
        let args = Args::parse_from([
            "iso-quant",
            "-a",
            "a.bed",
            "-r",
            "reads.bed",
            "--unstranded",
            "--paired-end",
            "--allow-partial",
            "-l",
            "150",
            "--upper-cost-bound",
            "0.5",
            "--cost-model",
            "logarithmic",
            "-t",
            "0",
        ]);
        let params = QuantParams::from(&args);

        assert!(!params.strand_aware);
        assert!(params.paired_end);
        assert!(!params.require_containment);
        assert_eq!(params.read_length, Some(150));
        assert_eq!(params.cost_bounds.upper, Some(0.5));
        assert_eq!(params.cost_model, CostModel::Logarithmic);
        assert_eq!(params.threads, 1);
    }

    #[test]
    fn test_args_require_reads() {
        assert!(Args::try_parse_from(["iso-quant", "-a", "a.bed"]).is_err());
    }
}
