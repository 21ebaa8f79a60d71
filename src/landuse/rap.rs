//! Canopy cover from remote-sensed fractional vegetation bands.

use crate::providers::CoverBands;
use std::collections::BTreeMap;

/// Base vegetation class of a disturbed class, ignoring burn severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VegClass {
    Forest,
    Shrub,
    TallGrass,
}

impl VegClass {
    /// `"forest high sev fire"` and `"forest"` both map to `Forest`.
    pub fn of(disturbed_class: &str) -> Option<VegClass> {
        let c = disturbed_class.trim().to_ascii_lowercase();
        if c.starts_with("forest") {
            Some(VegClass::Forest)
        } else if c.starts_with("shrub") {
            Some(VegClass::Shrub)
        } else if c.starts_with("tall grass") || c.starts_with("grass") {
            Some(VegClass::TallGrass)
        } else {
            None
        }
    }
}

/// Canopy cover fraction for one hillslope.
pub fn canopy_cover(class: VegClass, bands: &CoverBands) -> f64 {
    let grass = bands.annual_forb_grass + bands.perennial_forb_grass;
    let pct = match class {
        VegClass::Forest => bands.tree + 0.5 * bands.shrub,
        VegClass::Shrub => bands.shrub + 0.5 * bands.tree + 0.25 * grass,
        VegClass::TallGrass => grass + 0.25 * bands.shrub,
    };
    (pct / 100.0).clamp(0.0, 1.0)
}

/// Area-weighted mean canopy cover per management key.
///
/// Hillslopes whose management has no recognised disturbed class, or that
/// have no band data, do not contribute.
pub fn management_covers(
    domlc: &BTreeMap<i32, String>,
    areas: &BTreeMap<i32, f64>,
    bands: &BTreeMap<i32, CoverBands>,
    classes: &BTreeMap<String, Option<String>>,
) -> BTreeMap<String, f64> {
    let mut sums: BTreeMap<String, (f64, f64)> = BTreeMap::new();
    for (topaz, key) in domlc {
        let Some(class) = classes
            .get(key)
            .and_then(|c| c.as_deref())
            .and_then(VegClass::of)
        else {
            continue;
        };
        let (Some(b), Some(area)) = (bands.get(topaz), areas.get(topaz)) else {
            continue;
        };
        let e = sums.entry(key.clone()).or_insert((0.0, 0.0));
        e.0 += canopy_cover(class, b) * area;
        e.1 += area;
    }
    sums.into_iter()
        .filter(|(_, (_, a))| *a > 0.0)
        .map(|(k, (c, a))| (k, c / a))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bands() -> CoverBands {
        CoverBands {
            tree: 40.0,
            shrub: 20.0,
            annual_forb_grass: 10.0,
            perennial_forb_grass: 30.0,
        }
    }

    #[test]
    fn test_weights_per_class() {
        assert!((canopy_cover(VegClass::Forest, &bands()) - 0.50).abs() < 1e-12);
        assert!((canopy_cover(VegClass::Shrub, &bands()) - 0.50).abs() < 1e-12);
        assert!((canopy_cover(VegClass::TallGrass, &bands()) - 0.45).abs() < 1e-12);
    }

    #[test]
    fn test_burn_variants_share_the_base_class() {
        assert_eq!(VegClass::of("forest high sev fire"), Some(VegClass::Forest));
        assert_eq!(VegClass::of("Shrub"), Some(VegClass::Shrub));
        assert_eq!(VegClass::of("agriculture"), None);
    }

    #[test]
    fn test_area_weighted_mean() {
        let domlc = BTreeMap::from([(11, "42".to_string()), (12, "42".to_string())]);
        let areas = BTreeMap::from([(11, 100.0), (12, 300.0)]);
        let mut other = bands();
        other.tree = 80.0;
        let b = BTreeMap::from([(11, bands()), (12, other)]);
        let classes = BTreeMap::from([("42".to_string(), Some("forest".to_string()))]);
        let covers = management_covers(&domlc, &areas, &b, &classes);
        // 0.5 * 100 + 0.9 * 300 over 400
        assert!((covers["42"] - 0.8).abs() < 1e-12);
    }
}
