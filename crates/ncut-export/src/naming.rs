//! Output file-name derivation.
//!
//! Results are named after the input and the parameters that shaped
//! them: `hist.npy` segmented with 2500 superpixels at compactness 2.0
//! becomes `hist_ncut_sp2500_c2pt0`. Dots in the derived name are
//! spelled `pt` so the stem never grows a second extension.

use std::path::{Path, PathBuf};

/// File-name portion of [`output_stem`], without any directory.
#[must_use]
pub fn output_file_name(input: &Path, nr_sup_pix: u32, compactness: f64) -> String {
    let file_name = input
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let basename = file_name.split('.').next().unwrap_or_default();
    format!("{basename}_ncut_sp{nr_sup_pix}_c{compactness:?}").replace('.', "pt")
}

/// Derive the output path stem (no extension) for `input`.
///
/// The stem sits in the same directory as `input`. The basename is the
/// file name up to its first `.`, so `data/hist.v2.npy` yields
/// `data/hist_ncut_sp<n>_c<c>`.
#[must_use]
pub fn output_stem(input: &Path, nr_sup_pix: u32, compactness: f64) -> PathBuf {
    let name = output_file_name(input, nr_sup_pix, compactness);
    input
        .parent()
        .map_or_else(|| PathBuf::from(&name), |dir| dir.join(&name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_parameters() {
        let stem = output_stem(Path::new("hist.npy"), 2500, 2.0);
        assert_eq!(stem, PathBuf::from("hist_ncut_sp2500_c2pt0"));
    }

    #[test]
    fn stem_stays_next_to_input() {
        let stem = output_stem(Path::new("data/run1/hist.npy"), 200, 5.0);
        assert_eq!(stem, PathBuf::from("data/run1/hist_ncut_sp200_c5pt0"));
    }

    #[test]
    fn basename_stops_at_first_dot() {
        let name = output_file_name(Path::new("/tmp/hist.v2.npy"), 10, 0.5);
        assert_eq!(name, "hist_ncut_sp10_c0pt5");
    }

    #[test]
    fn dotted_directories_are_untouched() {
        let stem = output_stem(Path::new("./out.d/hist.npy"), 1, 1.0);
        assert_eq!(stem, PathBuf::from("./out.d/hist_ncut_sp1_c1pt0"));
    }

    #[test]
    fn name_has_no_extension() {
        let name = output_file_name(Path::new("hist.npy"), 2500, 12.25);
        assert!(!name.contains('.'));
        assert_eq!(name, "hist_ncut_sp2500_c12pt25");
    }
}
