use crate::error::{DicomSegError, Result};
use crate::series::ImageSeries;
use crate::types::Geometry;
use log::debug;
use std::path::Path;

/// Relative tolerance under which two overlaps count as a tie
const OVERLAP_TIE_TOLERANCE: f64 = 1e-9;

/// Picks the reference series of a segmentation
///
/// Series named in the file name (by UID, then by description) take
/// precedence. Otherwise the choice falls back on the physical overlap between
/// each series grid and `grid`. With `multi_image` every candidate is
/// returned instead of a single best one.
pub(crate) fn select_series<'a>(
    segmentation: &Path,
    grid: &Geometry,
    series: &'a [ImageSeries],
    multi_image: bool,
) -> Result<Vec<&'a ImageSeries>> {
    let filename = segmentation
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let named = disambiguate(&filename, series);
    if !named.is_empty() {
        debug!(
            "{} names {} series: {:?}",
            filename,
            named.len(),
            named.iter().map(|s| s.series_instance_uid.as_str()).collect::<Vec<_>>()
        );
        if multi_image || named.len() == 1 {
            return Ok(named);
        }
        return largest_overlap(segmentation, grid, &named).map(|best| vec![best]);
    }

    if series.len() == 1 {
        return Ok(series.iter().collect());
    }

    let candidates: Vec<&ImageSeries> = series.iter().collect();
    if multi_image {
        let overlapping: Vec<&ImageSeries> = candidates
            .into_iter()
            .filter(|s| s.geometry.overlap_volume(grid) > 0.0)
            .collect();
        if overlapping.is_empty() {
            return Err(no_overlap(segmentation, grid));
        }
        return Ok(overlapping);
    }
    largest_overlap(segmentation, grid, &candidates).map(|best| vec![best])
}

/// Series whose UID occurs in the file name, else whose description does
fn disambiguate<'a>(filename: &str, series: &'a [ImageSeries]) -> Vec<&'a ImageSeries> {
    let by_uid: Vec<&ImageSeries> = series
        .iter()
        .filter(|s| names_uid(filename, &s.series_instance_uid))
        .collect();
    if !by_uid.is_empty() {
        return by_uid;
    }
    series.iter().filter(|s| s.is_named_in(filename)).collect()
}

/// Whether `uid` occurs in `filename` as a whole UID
///
/// The match must not be glued to more UID components: `1.2.3.1` is not
/// named by `1.2.3.12` nor by `9.1.2.3.1`, but is by `P1_1.2.3.1.nrrd`.
fn names_uid(filename: &str, uid: &str) -> bool {
    if uid.is_empty() {
        return false;
    }
    let bytes = filename.as_bytes();
    filename.match_indices(uid).any(|(start, _)| {
        let end = start + uid.len();
        let starts_token = start == 0 || !matches!(bytes[start - 1], b'0'..=b'9' | b'.');
        let ends_token = match bytes.get(end) {
            Some(b'0'..=b'9') => false,
            Some(b'.') => !bytes.get(end + 1).is_some_and(|b| b.is_ascii_digit()),
            _ => true,
        };
        starts_token && ends_token
    })
}

fn largest_overlap<'a>(
    segmentation: &Path,
    grid: &Geometry,
    candidates: &[&'a ImageSeries],
) -> Result<&'a ImageSeries> {
    let mut scored: Vec<(f64, &ImageSeries)> = candidates
        .iter()
        .map(|s| (s.geometry.overlap_volume(grid), *s))
        .collect();
    scored.sort_by(|a, b| b.0.total_cmp(&a.0));

    let Some(&(best, best_series)) = scored.first() else {
        return Err(no_overlap(segmentation, grid));
    };
    if best <= 0.0 {
        return Err(no_overlap(segmentation, grid));
    }
    let tied: Vec<String> = scored
        .iter()
        .take_while(|(overlap, _)| (best - overlap).abs() <= best * OVERLAP_TIE_TOLERANCE)
        .map(|(_, s)| s.series_instance_uid.clone())
        .collect();
    if tied.len() > 1 {
        return Err(DicomSegError::AmbiguousSeriesAssociation {
            segmentation: segmentation.to_path_buf(),
            candidates: tied,
        });
    }
    Ok(best_series)
}

fn no_overlap(segmentation: &Path, grid: &Geometry) -> DicomSegError {
    DicomSegError::IncompatibleGeometry(format!(
        "{} ({}) overlaps no image series",
        segmentation.display(),
        grid
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::path::PathBuf;

    fn series(uid: &str, origin: [f64; 3], description: Option<&str>) -> ImageSeries {
        let geometry = Geometry::axis_aligned(origin, [1.0; 3], [10, 10, 10]);
        let series = ImageSeries::new(uid, geometry);
        match description {
            Some(d) => series.with_description(d),
            None => series,
        }
    }

    fn uids(selected: &[&ImageSeries]) -> Vec<String> {
        selected.iter().map(|s| s.series_instance_uid.clone()).collect()
    }

    fn grid() -> Geometry {
        Geometry::axis_aligned([0.0; 3], [1.0; 3], [10, 10, 10])
    }

    #[test]
    fn test_uid_in_filename_wins() {
        let all = vec![
            series("1.2.3.1", [0.0; 3], Some("CT")),
            series("1.2.3.2", [0.0; 3], Some("PET")),
        ];
        let path = PathBuf::from("P1_1.2.3.2.nii.gz");
        let selected = select_series(&path, &grid(), &all, false).unwrap();
        assert_eq!(uids(&selected), vec!["1.2.3.2"]);
    }

    #[test]
    fn test_uid_prefix_of_another_uid() {
        let all = vec![
            series("1.2.3.1", [0.0; 3], None),
            series("1.2.3.12", [0.0; 3], None),
        ];
        let selected =
            select_series(Path::new("P1_1.2.3.12.nrrd"), &grid(), &all, false).unwrap();
        assert_eq!(uids(&selected), vec!["1.2.3.12"]);

        let selected = select_series(Path::new("P1_1.2.3.1.nrrd"), &grid(), &all, true).unwrap();
        assert_eq!(uids(&selected), vec!["1.2.3.1"]);
    }

    #[rstest]
    #[case("P1_1.2.3.1.nrrd", true)]
    #[case("1.2.3.1", true)]
    #[case("P1_1.2.3.1_liver.nii.gz", true)]
    #[case("P1_1.2.3.12.nrrd", false)]
    #[case("P1_9.1.2.3.1.nrrd", false)]
    #[case("P1_1.2.3.1.4.nrrd", false)]
    #[case("P1_liver.nrrd", false)]
    fn test_names_uid(#[case] filename: &str, #[case] expected: bool) {
        assert_eq!(names_uid(filename, "1.2.3.1"), expected);
    }

    #[test]
    fn test_description_in_filename() {
        let all = vec![
            series("1.2.3.1", [0.0; 3], Some("Arterial")),
            series("1.2.3.2", [0.0; 3], Some("Venous")),
        ];
        let path = PathBuf::from("P1_venous_liver.nrrd");
        let selected = select_series(&path, &grid(), &all, false).unwrap();
        assert_eq!(uids(&selected), vec!["1.2.3.2"]);
    }

    #[test]
    fn test_single_series_is_chosen() {
        let all = vec![series("1.2.3.1", [500.0; 3], None)];
        let selected = select_series(Path::new("P1.nrrd"), &grid(), &all, false).unwrap();
        assert_eq!(uids(&selected), vec!["1.2.3.1"]);
    }

    #[test]
    fn test_largest_overlap() {
        let all = vec![
            series("1.2.3.1", [5.0, 0.0, 0.0], None),
            series("1.2.3.2", [1.0, 0.0, 0.0], None),
            series("1.2.3.3", [50.0, 0.0, 0.0], None),
        ];
        let selected = select_series(Path::new("P1.nrrd"), &grid(), &all, false).unwrap();
        assert_eq!(uids(&selected), vec!["1.2.3.2"]);
    }

    #[test]
    fn test_equal_overlap_is_ambiguous() {
        let all = vec![
            series("1.2.3.1", [0.0; 3], None),
            series("1.2.3.2", [0.0; 3], None),
        ];
        let result = select_series(Path::new("P1.nrrd"), &grid(), &all, false);
        assert!(matches!(
            result,
            Err(DicomSegError::AmbiguousSeriesAssociation { candidates, .. }) if candidates.len() == 2
        ));
    }

    #[test]
    fn test_no_overlap_is_incompatible() {
        let all = vec![
            series("1.2.3.1", [100.0; 3], None),
            series("1.2.3.2", [200.0; 3], None),
        ];
        let result = select_series(Path::new("P1.nrrd"), &grid(), &all, false);
        assert!(matches!(result, Err(DicomSegError::IncompatibleGeometry(_))));
    }

    #[test]
    fn test_multi_image_takes_every_overlapping_series() {
        let all = vec![
            series("1.2.3.1", [0.0; 3], None),
            series("1.2.3.2", [5.0, 0.0, 0.0], None),
            series("1.2.3.3", [100.0; 3], None),
        ];
        let selected = select_series(Path::new("P1.nrrd"), &grid(), &all, true).unwrap();
        assert_eq!(uids(&selected), vec!["1.2.3.1", "1.2.3.2"]);
    }

    #[test]
    fn test_multi_image_keeps_every_named_series() {
        let all = vec![
            series("1.2.3.1", [0.0; 3], Some("CT")),
            series("1.2.3.2", [0.0; 3], Some("CT")),
            series("1.2.3.3", [0.0; 3], Some("MR")),
        ];
        let selected = select_series(Path::new("P1_ct.nrrd"), &grid(), &all, true).unwrap();
        assert_eq!(uids(&selected), vec!["1.2.3.1", "1.2.3.2"]);
    }
}
