//! WGS84 transverse Mercator (UTM) projection and nearest-neighbour
//! reprojection of run rasters to geographic coordinates.

use super::GeoTools;
use crate::error::{Error, Result};
use crate::raster::{GeoTransform, Grid};

const A: f64 = 6_378_137.0;
const F: f64 = 1.0 / 298.257_223_563;
const K0: f64 = 0.9996;
const FALSE_EASTING: f64 = 500_000.0;
const FALSE_NORTHING: f64 = 10_000_000.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Utm {
    pub zone: u32,
    pub northern: bool,
}

impl Utm {
    pub fn new(zone: u32, northern: bool) -> Self {
        Utm { zone, northern }
    }

    pub fn zone_of(lon: f64) -> u32 {
        (((lon + 180.0) / 6.0).floor() as i64).clamp(0, 59) as u32 + 1
    }

    fn central_meridian(&self) -> f64 {
        (self.zone as f64 - 1.0) * 6.0 - 180.0 + 3.0
    }

    pub fn forward(&self, lon: f64, lat: f64) -> (f64, f64) {
        let e2 = F * (2.0 - F);
        let ep2 = e2 / (1.0 - e2);
        let phi = lat.to_radians();
        let dlam = (lon - self.central_meridian()).to_radians();

        let (sin_phi, cos_phi) = phi.sin_cos();
        let n = A / (1.0 - e2 * sin_phi * sin_phi).sqrt();
        let t = phi.tan().powi(2);
        let c = ep2 * cos_phi * cos_phi;
        let a = cos_phi * dlam;
        let m = meridian_arc(phi, e2);

        let x = K0
            * n
            * (a + (1.0 - t + c) * a.powi(3) / 6.0
                + (5.0 - 18.0 * t + t * t + 72.0 * c - 58.0 * ep2) * a.powi(5) / 120.0)
            + FALSE_EASTING;
        let mut y = K0
            * (m + n
                * phi.tan()
                * (a * a / 2.0
                    + (5.0 - t + 9.0 * c + 4.0 * c * c) * a.powi(4) / 24.0
                    + (61.0 - 58.0 * t + t * t + 600.0 * c - 330.0 * ep2) * a.powi(6) / 720.0));
        if !self.northern {
            y += FALSE_NORTHING;
        }
        (x, y)
    }

    pub fn inverse(&self, x: f64, y: f64) -> (f64, f64) {
        let e2 = F * (2.0 - F);
        let ep2 = e2 / (1.0 - e2);
        let x = x - FALSE_EASTING;
        let y = if self.northern { y } else { y - FALSE_NORTHING };

        let m = y / K0;
        let mu = m / (A * (1.0 - e2 / 4.0 - 3.0 * e2 * e2 / 64.0 - 5.0 * e2.powi(3) / 256.0));
        let e1 = (1.0 - (1.0 - e2).sqrt()) / (1.0 + (1.0 - e2).sqrt());
        let phi1 = mu
            + (3.0 * e1 / 2.0 - 27.0 * e1.powi(3) / 32.0) * (2.0 * mu).sin()
            + (21.0 * e1 * e1 / 16.0 - 55.0 * e1.powi(4) / 32.0) * (4.0 * mu).sin()
            + (151.0 * e1.powi(3) / 96.0) * (6.0 * mu).sin()
            + (1097.0 * e1.powi(4) / 512.0) * (8.0 * mu).sin();

        let (sin1, cos1) = phi1.sin_cos();
        let n1 = A / (1.0 - e2 * sin1 * sin1).sqrt();
        let t1 = phi1.tan().powi(2);
        let c1 = ep2 * cos1 * cos1;
        let r1 = A * (1.0 - e2) / (1.0 - e2 * sin1 * sin1).powf(1.5);
        let d = x / (n1 * K0);

        let lat = phi1
            - (n1 * phi1.tan() / r1)
                * (d * d / 2.0
                    - (5.0 + 3.0 * t1 + 10.0 * c1 - 4.0 * c1 * c1 - 9.0 * ep2) * d.powi(4) / 24.0
                    + (61.0 + 90.0 * t1 + 298.0 * c1 + 45.0 * t1 * t1 - 252.0 * ep2 - 3.0 * c1 * c1)
                        * d.powi(6)
                        / 720.0);
        let lon = (d - (1.0 + 2.0 * t1 + c1) * d.powi(3) / 6.0
            + (5.0 - 2.0 * c1 + 28.0 * t1 - 3.0 * c1 * c1 + 8.0 * ep2 + 24.0 * t1 * t1) * d.powi(5)
                / 120.0)
            / cos1;
        (self.central_meridian() + lon.to_degrees(), lat.to_degrees())
    }
}

fn meridian_arc(phi: f64, e2: f64) -> f64 {
    let e4 = e2 * e2;
    let e6 = e4 * e2;
    A * ((1.0 - e2 / 4.0 - 3.0 * e4 / 64.0 - 5.0 * e6 / 256.0) * phi
        - (3.0 * e2 / 8.0 + 3.0 * e4 / 32.0 + 45.0 * e6 / 1024.0) * (2.0 * phi).sin()
        + (15.0 * e4 / 256.0 + 45.0 * e6 / 1024.0) * (4.0 * phi).sin()
        - (35.0 * e6 / 3072.0) * (6.0 * phi).sin())
}

impl GeoTools for Utm {
    fn utm_to_lonlat(&self, x: f64, y: f64) -> (f64, f64) {
        self.inverse(x, y)
    }

    fn lonlat_to_utm(&self, lon: f64, lat: f64) -> (f64, f64) {
        self.forward(lon, lat)
    }

    fn reproject_to_wgs(&self, grid: &Grid<f64>) -> Result<Grid<f64>> {
        if grid.ncols == 0 || grid.nrows == 0 {
            return Err(Error::validation("cannot reproject an empty raster"));
        }
        let t = grid.transform;
        let xmax = t.xllcorner + grid.ncols as f64 * t.cellsize;
        let ymax = t.yllcorner + grid.nrows as f64 * t.cellsize;
        let corners = [
            self.inverse(t.xllcorner, t.yllcorner),
            self.inverse(t.xllcorner, ymax),
            self.inverse(xmax, t.yllcorner),
            self.inverse(xmax, ymax),
        ];
        let lon_min = corners.iter().map(|c| c.0).fold(f64::INFINITY, f64::min);
        let lon_max = corners.iter().map(|c| c.0).fold(f64::NEG_INFINITY, f64::max);
        let lat_min = corners.iter().map(|c| c.1).fold(f64::INFINITY, f64::min);
        let lat_max = corners.iter().map(|c| c.1).fold(f64::NEG_INFINITY, f64::max);

        let cellsize = ((lon_max - lon_min) / grid.ncols as f64)
            .min((lat_max - lat_min) / grid.nrows as f64);
        let ncols = ((lon_max - lon_min) / cellsize).ceil().max(1.0) as usize;
        let nrows = ((lat_max - lat_min) / cellsize).ceil().max(1.0) as usize;
        let transform = GeoTransform {
            xllcorner: lon_min,
            yllcorner: lat_min,
            cellsize,
        };

        let mut out = Grid::new(ncols, nrows, transform, grid.nodata);
        for py in 0..nrows {
            for px in 0..ncols {
                let (lon, lat) = transform.cell_center(px, py, nrows);
                let (x, y) = self.forward(lon, lat);
                let (sx, sy) = t.to_pixel(x, y, grid.nrows);
                if sx < 0 || sy < 0 {
                    continue;
                }
                if let Some(v) = grid.get(sx as usize, sy as usize) {
                    out.set(px, py, v);
                }
            }
        }
        Ok(out)
    }
}
