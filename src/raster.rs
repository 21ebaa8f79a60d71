//! Minimal in-core raster support.
//!
//! Full geoprocessing (reprojection, polygon rasterization, DEM fetch) lives
//! behind the provider traits. What the controllers need locally is a grid of
//! values aligned to the subcatchment raster, ESRI ASCII IO, and a handful of
//! zonal operators (pixel counts, polygon mode, boundary touch).

use crate::error::{Error, IoContext, Result};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt::Display;
use std::fs;
use std::path::Path;
use std::str::FromStr;

/// Affine placement of a north-up grid: upper-left corner and square cell size.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct GeoTransform {
    pub xllcorner: f64,
    pub yllcorner: f64,
    pub cellsize: f64,
}

impl GeoTransform {
    /// Centre of cell (px, py) with py counted from the top row.
    pub fn cell_center(&self, px: usize, py: usize, nrows: usize) -> (f64, f64) {
        let x = self.xllcorner + (px as f64 + 0.5) * self.cellsize;
        let y = self.yllcorner + ((nrows - py) as f64 - 0.5) * self.cellsize;
        (x, y)
    }

    pub fn to_pixel(&self, x: f64, y: f64, nrows: usize) -> (isize, isize) {
        let px = ((x - self.xllcorner) / self.cellsize).floor() as isize;
        let row_from_bottom = ((y - self.yllcorner) / self.cellsize).floor() as isize;
        (px, nrows as isize - 1 - row_from_bottom)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Grid<T> {
    pub ncols: usize,
    pub nrows: usize,
    pub transform: GeoTransform,
    pub nodata: T,
    pub data: Vec<T>,
}

impl<T: Copy + PartialEq> Grid<T> {
    pub fn new(ncols: usize, nrows: usize, transform: GeoTransform, nodata: T) -> Self {
        Grid {
            ncols,
            nrows,
            transform,
            nodata,
            data: vec![nodata; ncols * nrows],
        }
    }

    pub fn from_rows(rows: Vec<Vec<T>>, transform: GeoTransform, nodata: T) -> Result<Self> {
        let nrows = rows.len();
        let ncols = rows.first().map(|r| r.len()).unwrap_or(0);
        if rows.iter().any(|r| r.len() != ncols) {
            return Err(Error::validation("ragged raster rows"));
        }
        Ok(Grid {
            ncols,
            nrows,
            transform,
            nodata,
            data: rows.into_iter().flatten().collect(),
        })
    }

    pub fn get(&self, px: usize, py: usize) -> Option<T> {
        if px < self.ncols && py < self.nrows {
            Some(self.data[py * self.ncols + px])
        } else {
            None
        }
    }

    pub fn set(&mut self, px: usize, py: usize, value: T) {
        if px < self.ncols && py < self.nrows {
            self.data[py * self.ncols + px] = value;
        }
    }

    /// Iterates `(px, py, value)` over cells that are not nodata.
    pub fn cells(&self) -> impl Iterator<Item = (usize, usize, T)> + '_ {
        self.data.iter().enumerate().filter_map(move |(i, v)| {
            if *v == self.nodata {
                None
            } else {
                Some((i % self.ncols, i / self.ncols, *v))
            }
        })
    }

    pub fn is_aligned_with<U>(&self, other: &Grid<U>) -> bool {
        self.ncols == other.ncols && self.nrows == other.nrows
    }

    pub fn is_boundary(&self, px: usize, py: usize) -> bool {
        px == 0 || py == 0 || px + 1 == self.ncols || py + 1 == self.nrows
    }

    pub fn map<U: Copy + PartialEq>(&self, nodata: U, f: impl Fn(T) -> U) -> Grid<U> {
        Grid {
            ncols: self.ncols,
            nrows: self.nrows,
            transform: self.transform,
            nodata,
            data: self
                .data
                .iter()
                .map(|v| if *v == self.nodata { nodata } else { f(*v) })
                .collect(),
        }
    }
}

impl<T> Grid<T>
where
    T: Copy + PartialEq + Display + FromStr,
{
    /// Reads an ESRI ASCII grid.
    pub fn read_ascii(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).at(path)?;
        Self::parse_ascii(&text)
            .map_err(|e| Error::validation(format!("{}: {}", path.display(), e)))
    }

    pub fn parse_ascii(text: &str) -> std::result::Result<Self, String> {
        let mut header: HashMap<String, String> = HashMap::new();
        let mut lines = text.lines().peekable();
        while let Some(line) = lines.peek() {
            let mut parts = line.split_whitespace();
            let key = match parts.next() {
                Some(k) if k.chars().next().is_some_and(|c| c.is_ascii_alphabetic()) => {
                    k.to_ascii_lowercase()
                }
                _ => break,
            };
            let value = parts.next().unwrap_or_default().to_string();
            header.insert(key, value);
            lines.next();
        }

        let field = |name: &str| -> std::result::Result<&String, String> {
            header.get(name).ok_or(format!("missing `{}` header", name))
        };
        let ncols: usize = field("ncols")?.parse().map_err(|_| "bad ncols")?;
        let nrows: usize = field("nrows")?.parse().map_err(|_| "bad nrows")?;
        let xll: f64 = header
            .get("xllcorner")
            .or_else(|| header.get("xllcenter"))
            .ok_or("missing xllcorner")?
            .parse()
            .map_err(|_| "bad xllcorner")?;
        let yll: f64 = header
            .get("yllcorner")
            .or_else(|| header.get("yllcenter"))
            .ok_or("missing yllcorner")?
            .parse()
            .map_err(|_| "bad yllcorner")?;
        let cellsize: f64 = field("cellsize")?.parse().map_err(|_| "bad cellsize")?;
        let nodata: T = header
            .get("nodata_value")
            .ok_or("missing NODATA_value")?
            .parse()
            .map_err(|_| "bad NODATA_value")?;

        let mut data = Vec::with_capacity(ncols * nrows);
        for line in lines {
            for token in line.split_whitespace() {
                data.push(
                    token
                        .parse::<T>()
                        .map_err(|_| format!("bad cell value `{}`", token))?,
                );
            }
        }
        if data.len() != ncols * nrows {
            return Err(format!(
                "expected {} cells, found {}",
                ncols * nrows,
                data.len()
            ));
        }

        Ok(Grid {
            ncols,
            nrows,
            transform: GeoTransform {
                xllcorner: xll,
                yllcorner: yll,
                cellsize,
            },
            nodata,
            data,
        })
    }

    pub fn to_ascii(&self) -> String {
        let mut out = format!(
            "ncols {}\nnrows {}\nxllcorner {}\nyllcorner {}\ncellsize {}\nNODATA_value {}\n",
            self.ncols,
            self.nrows,
            self.transform.xllcorner,
            self.transform.yllcorner,
            self.transform.cellsize,
            self.nodata
        );
        for row in self.data.chunks(self.ncols.max(1)) {
            let line: Vec<String> = row.iter().map(|v| v.to_string()).collect();
            out.push_str(&line.join(" "));
            out.push('\n');
        }
        out
    }

    pub fn write_ascii(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).at(parent)?;
        }
        fs::write(path, self.to_ascii()).at(path)
    }
}

/// Topaz-keyed zonal statistics over a subcatchment grid.
pub fn pixel_counts(subwta: &Grid<i32>) -> BTreeMap<i32, usize> {
    let mut counts = BTreeMap::new();
    for (_, _, id) in subwta.cells() {
        if id > 0 {
            *counts.entry(id).or_insert(0) += 1;
        }
    }
    counts
}

/// Mean pixel location of each polygon, rounded to the nearest cell.
pub fn centroids_px(subwta: &Grid<i32>) -> BTreeMap<i32, (usize, usize)> {
    let mut sums: BTreeMap<i32, (f64, f64, f64)> = BTreeMap::new();
    for (px, py, id) in subwta.cells() {
        if id > 0 {
            let e = sums.entry(id).or_insert((0.0, 0.0, 0.0));
            e.0 += px as f64;
            e.1 += py as f64;
            e.2 += 1.0;
        }
    }
    sums.into_iter()
        .map(|(id, (sx, sy, n))| (id, ((sx / n).round() as usize, (sy / n).round() as usize)))
        .collect()
}

/// Polygons whose cells touch the raster boundary.
pub fn boundary_polygons(subwta: &Grid<i32>) -> BTreeSet<i32> {
    subwta
        .cells()
        .filter(|&(px, py, id)| id > 0 && subwta.is_boundary(px, py))
        .map(|(_, _, id)| id)
        .collect()
}

/// Most frequent value of `values` inside each polygon of `polygons`.
///
/// Polygons for which `skip_polygon` returns true (channels) are left out, and
/// values in `ignore` never win. Ties resolve to the smaller value so repeated
/// builds agree.
pub fn polygon_mode<V>(
    polygons: &Grid<i32>,
    values: &Grid<V>,
    ignore: &[V],
    skip_polygon: impl Fn(i32) -> bool,
) -> Result<BTreeMap<i32, Option<V>>>
where
    V: Copy + PartialEq + Ord,
{
    if !polygons.is_aligned_with(values) {
        return Err(Error::validation(format!(
            "raster {}x{} is not aligned with subcatchments {}x{}",
            values.ncols, values.nrows, polygons.ncols, polygons.nrows
        )));
    }

    let mut tallies: BTreeMap<i32, BTreeMap<V, usize>> = BTreeMap::new();
    for (i, id) in polygons.data.iter().enumerate() {
        if *id <= 0 || *id == polygons.nodata || skip_polygon(*id) {
            continue;
        }
        let tally = tallies.entry(*id).or_default();
        let v = values.data[i];
        if v == values.nodata || ignore.contains(&v) {
            continue;
        }
        *tally.entry(v).or_insert(0) += 1;
    }

    Ok(tallies
        .into_iter()
        .map(|(id, tally)| {
            let best = tally
                .iter()
                .max_by(|a, b| a.1.cmp(b.1).then(b.0.cmp(a.0)))
                .map(|(v, _)| *v);
            (id, best)
        })
        .collect())
}

/// Mode of `values` for every (polygon, segment) pair.
pub fn polygon_segment_mode<V>(
    polygons: &Grid<i32>,
    segments: &Grid<i32>,
    values: &Grid<V>,
    ignore: &[V],
    skip_polygon: impl Fn(i32) -> bool,
) -> Result<BTreeMap<(i32, i32), Option<V>>>
where
    V: Copy + PartialEq + Ord,
{
    if !polygons.is_aligned_with(segments) || !polygons.is_aligned_with(values) {
        return Err(Error::validation(
            "segment or value raster is not aligned with subcatchments",
        ));
    }
    let mut tallies: BTreeMap<(i32, i32), BTreeMap<V, usize>> = BTreeMap::new();
    for (i, id) in polygons.data.iter().enumerate() {
        let seg = segments.data[i];
        if *id <= 0 || skip_polygon(*id) || seg <= 0 || seg == segments.nodata {
            continue;
        }
        let tally = tallies.entry((*id, seg)).or_default();
        let v = values.data[i];
        if v == values.nodata || ignore.contains(&v) {
            continue;
        }
        *tally.entry(v).or_insert(0) += 1;
    }
    Ok(tallies
        .into_iter()
        .map(|(key, tally)| {
            let best = tally
                .iter()
                .max_by(|a, b| a.1.cmp(b.1).then(b.0.cmp(a.0)))
                .map(|(v, _)| *v);
            (key, best)
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transform() -> GeoTransform {
        GeoTransform {
            xllcorner: 500000.0,
            yllcorner: 4000000.0,
            cellsize: 30.0,
        }
    }

    #[test]
    fn test_ascii_roundtrip_preserves_cells() {
        let grid = Grid::from_rows(vec![vec![1, 2, 3], vec![-9999, 5, 6]], transform(), -9999)
            .unwrap();
        let parsed = Grid::<i32>::parse_ascii(&grid.to_ascii()).unwrap();
        assert_eq!(parsed, grid);
        assert_eq!(parsed.cells().count(), 5);
    }

    #[test]
    fn test_polygon_mode_skips_channels_and_ignored_values() {
        let subwta =
            Grid::from_rows(vec![vec![11, 11, 14], vec![11, 12, 14]], transform(), 0).unwrap();
        let lc = Grid::from_rows(vec![vec![42, 255, 71], vec![42, 71, 71]], transform(), -1)
            .unwrap();
        let modes = polygon_mode(&subwta, &lc, &[255], |id| id % 10 == 4).unwrap();
        assert_eq!(modes.get(&11), Some(&Some(42)));
        assert_eq!(modes.get(&12), Some(&Some(71)));
        assert!(!modes.contains_key(&14));
    }

    #[test]
    fn test_boundary_polygons() {
        let subwta = Grid::from_rows(
            vec![vec![0, 0, 0, 0], vec![0, 21, 22, 0], vec![23, 23, 0, 0]],
            transform(),
            0,
        )
        .unwrap();
        let edge = boundary_polygons(&subwta);
        assert!(edge.contains(&23));
        assert!(!edge.contains(&21));
    }

    #[test]
    fn test_cell_center_and_pixel_agree() {
        let t = transform();
        let (x, y) = t.cell_center(2, 1, 4);
        assert_eq!(t.to_pixel(x, y, 4), (2, 1));
    }
}
