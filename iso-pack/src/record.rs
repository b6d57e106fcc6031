use config::{Strand, GENE_FIELD, MIN_BED_FIELDS};
use serde::{Deserialize, Serialize};

/// BED12 line parser
#[derive(Debug, PartialEq, Clone)]
pub struct Bed12;

/// A BED12 record: an annotated transcript or a mapped read.
/// Coordinates are 0-based half-open on the forward strand.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct GenePred {
    pub name: String,
    pub chrom: String,
    pub strand: Strand,
    pub start: u64,
    pub end: u64,
    pub cds_start: u64,
    pub cds_end: u64,
    pub exons: Vec<(u64, u64)>,
    pub introns: Vec<(u64, u64)>,
    pub exon_count: usize,
    pub gene: Option<String>,
    pub is_ref: bool,
}

impl GenePred {
    /// exonic (spliced) length
    #[inline(always)]
    pub fn length(&self) -> u64 {
        self.exons.iter().map(|(s, e)| e - s).sum()
    }

    /// mate number for names ending in /1 or /2
    pub fn mate(&self) -> Option<u8> {
        match self.name.rsplit_once('/') {
            Some((_, "1")) => Some(1),
            Some((_, "2")) => Some(2),
            _ => None,
        }
    }

    /// read name without its mate suffix
    pub fn fragment_name(&self) -> &str {
        match self.mate() {
            Some(_) => self
                .name
                .rsplit_once('/')
                .map(|(head, _)| head)
                .unwrap_or(&self.name),
            None => &self.name,
        }
    }
}

impl Bed12 {
    #[inline(always)]
    pub fn read(line: &str, is_ref: bool) -> Result<GenePred, &'static str> {
        if line.is_empty() {
            return Err("Empty line");
        }

        let fields: Vec<&str> = line.trim_end().split('\t').collect();
        if fields.len() < MIN_BED_FIELDS {
            return Err("Line has fewer than 12 fields");
        }

        let get = |field: &str| field.parse::<u64>().map_err(|_| "Cannot parse field");
        let (chrom, name) = (fields[0], fields[3]);
        let tx_start = get(fields[1])?;
        let tx_end = get(fields[2])?;
        let cds_start = get(fields[6])?;
        let cds_end = get(fields[7])?;

        if tx_end <= tx_start {
            return Err("Transcript end is not after start");
        }

        let strand = fields[5]
            .chars()
            .next()
            .ok_or("Cannot parse strand as char")
            .and_then(Strand::try_from)?;

        let block_count = fields[9]
            .parse::<usize>()
            .map_err(|_| "Cannot parse block_count")?;
        let (exons, introns) = get_coords(fields[11], fields[10], tx_start, tx_end)?;

        if exons.len() != block_count {
            return Err("Block count does not match block lists");
        }

        let gene = fields
            .get(GENE_FIELD)
            .map(|g| g.trim())
            .filter(|g| !g.is_empty())
            .map(String::from);

        Ok(GenePred {
            name: name.into(),
            chrom: chrom.into(),
            strand,
            start: tx_start,
            end: tx_end,
            cds_start,
            cds_end,
            exon_count: exons.len(),
            exons,
            introns,
            gene,
            is_ref,
        })
    }
}

#[inline(always)]
fn get_coords(
    starts: &str,
    sizes: &str,
    tx_start: u64,
    tx_end: u64,
) -> Result<(Vec<(u64, u64)>, Vec<(u64, u64)>), &'static str> {
    let group = |field: &str| -> Result<Vec<u64>, &'static str> {
        field
            .split(',')
            .filter(|num| !num.is_empty())
            .map(|num| num.parse::<u64>().map_err(|_| "Cannot parse number"))
            .collect()
    };

    let ss = group(starts)?;
    let sz = group(sizes)?;

    if ss.len() != sz.len() {
        return Err("Exon start and end vectors have different lengths");
    }
    if ss.is_empty() {
        return Err("Record has no blocks");
    }

    let mut exons = ss
        .iter()
        .zip(&sz)
        .map(|(&s, &z)| (tx_start + s, tx_start + s + z))
        .collect::<Vec<_>>();
    exons.sort_unstable();

    for exon in exons.iter() {
        if exon.1 <= exon.0 || exon.1 > tx_end {
            return Err("Block lies outside of record bounds");
        }
    }
    if exons.windows(2).any(|w| w[1].0 < w[0].1) {
        return Err("Blocks overlap");
    }

    let introns = gapper(&exons);

    Ok((exons, introns))
}

/// gaps between consecutive sorted blocks
fn gapper(intervals: &[(u64, u64)]) -> Vec<(u64, u64)> {
    intervals
        .windows(2)
        .filter_map(|window| match window {
            [prev, next] if prev.1 < next.0 => Some((prev.1, next.0)),
            _ => None,
        })
        .collect()
}
