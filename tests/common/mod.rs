//! Synthetic cohort shared by the integration tests: 20 genes x 5 samples, twelve
//! ten-gene sets and a twenty-row labelled reference.

use std::fs;
use std::path::{Path, PathBuf};

pub const N_GENES: usize = 20;
pub const N_SAMPLES: usize = 5;
pub const N_SETS: usize = 12;

fn gene(g: usize) -> String {
    format!("G{g:02}")
}

pub fn set_name(k: usize) -> String {
    format!("GOBP_SET_{k:02}")
}

pub fn write_expression(dir: &Path) -> PathBuf {
    let mut text = String::from("gene");
    for s in 0..N_SAMPLES {
        text.push_str(&format!("\tGSM{s}"));
    }
    text.push('\n');
    for g in 0..N_GENES {
        text.push_str(&gene(g));
        for s in 0..N_SAMPLES {
            let value = ((g * 7 + s * 13) % 17) as f64 * 0.5 + 1.0 + g as f64 * 0.01;
            text.push_str(&format!("\t{value}"));
        }
        text.push('\n');
    }
    let path = dir.join("expression.tsv");
    fs::write(&path, text).expect("write expression");
    path
}

pub fn write_gene_sets(dir: &Path) -> PathBuf {
    let mut text = String::new();
    for k in 0..N_SETS {
        text.push_str(&set_name(k));
        text.push_str("\tsynthetic");
        for j in 0..10 {
            text.push('\t');
            text.push_str(&gene((k + j) % N_GENES));
        }
        text.push('\n');
    }
    let path = dir.join("sets.gmt");
    fs::write(&path, text).expect("write gene sets");
    path
}

/// Ten virulent then ten avirulent reference rows over `features`.
pub fn write_reference(dir: &Path, features: &[String]) -> PathBuf {
    let mut text = format!("SampleID,Class,{}\n", features.join(","));
    for i in 0..20 {
        let (class, sign) = if i < 10 {
            ("Virulent", 1.0)
        } else {
            ("Avirulent", -1.0)
        };
        text.push_str(&format!("ref{i},{class}"));
        for j in 0..features.len() {
            let value = sign * 0.4 + ((i * 3 + j * 5) % 7) as f64 * 0.05 - 0.15;
            text.push_str(&format!(",{value}"));
        }
        text.push('\n');
    }
    let path = dir.join("reference.csv");
    fs::write(&path, text).expect("write reference");
    path
}

pub fn all_features() -> Vec<String> {
    (0..N_SETS).map(set_name).collect()
}

/// The first `matched` gene sets followed by `absent` names no set carries.
pub fn with_absent(matched: usize, absent: usize) -> Vec<String> {
    (0..matched)
        .map(set_name)
        .chain((0..absent).map(|k| format!("GOBP_ABSENT_{k}")))
        .collect()
}
