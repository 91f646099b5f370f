use crate::error::{PipelineError, Result};
use std::{
    fs,
    path::{Path, PathBuf},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    pub base_name: String,
    pub path: PathBuf,
}

/// Lists the sequence files directly inside `input_dir`, sorted by base
/// name. Other files and subdirectories are skipped.
pub fn enumerate_samples(
    input_dir: &Path,
    is_sequence_extension: impl Fn(&str) -> bool,
) -> Result<Vec<Sample>> {
    let entries = fs::read_dir(input_dir).map_err(|e| {
        PipelineError::io(
            format!("Could not list input directory '{}'", input_dir.display()),
            e,
        )
    })?;

    let mut samples = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| {
            PipelineError::io(
                format!("Could not list input directory '{}'", input_dir.display()),
                e,
            )
        })?;
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if name.starts_with('.') || !path.is_file() {
            continue;
        }
        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            continue;
        };
        if !is_sequence_extension(ext) {
            continue;
        }
        let Some(base_name) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        samples.push(Sample {
            base_name: base_name.to_string(),
            path,
        });
    }
    samples.sort_by(|a, b| a.base_name.cmp(&b.base_name).then(a.path.cmp(&b.path)));

    if let Some(pair) = samples.windows(2).find(|w| w[0].base_name == w[1].base_name) {
        return Err(PipelineError::InvalidInput {
            path: input_dir.to_path_buf(),
            reason: format!(
                "'{}' and '{}' would share the sample name '{}'",
                pair[0].path.display(),
                pair[1].path.display(),
                pair[0].base_name
            ),
        });
    }
    Ok(samples)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn fasta_only(ext: &str) -> bool {
        ext.eq_ignore_ascii_case("fasta") || ext.eq_ignore_ascii_case("fa")
    }

    #[test]
    fn lists_matching_files_sorted_and_ignores_the_rest() {
        let td = tempdir().unwrap();
        for name in ["zeta.fasta", "alpha.FASTA", "notes.txt", ".hidden.fasta", "beta.fa"] {
            fs::write(td.path().join(name), ">x\nA\n").unwrap();
        }
        fs::create_dir(td.path().join("nested.fasta")).unwrap();
        fs::create_dir(td.path().join("sub")).unwrap();
        fs::write(td.path().join("sub").join("deep.fasta"), ">x\nA\n").unwrap();

        let samples = enumerate_samples(td.path(), fasta_only).unwrap();
        let names: Vec<&str> = samples.iter().map(|s| s.base_name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "beta", "zeta"]);
        assert_eq!(samples[2].path, td.path().join("zeta.fasta"));
    }

    #[test]
    fn directory_without_sequences_yields_no_samples() {
        let td = tempdir().unwrap();
        fs::write(td.path().join("README"), "nothing here").unwrap();
        assert!(enumerate_samples(td.path(), fasta_only).unwrap().is_empty());
    }

    #[test]
    fn colliding_base_names_are_rejected() {
        let td = tempdir().unwrap();
        fs::write(td.path().join("s1.fa"), ">x\nA\n").unwrap();
        fs::write(td.path().join("s1.fasta"), ">x\nA\n").unwrap();
        let err = enumerate_samples(td.path(), fasta_only).unwrap_err();
        assert!(err.to_string().contains("share the sample name 's1'"), "{err}");
    }
}
