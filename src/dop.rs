//! DOP (dilution of precision) solver: a 4x4 least-squares inversion over
//! satellite line-of-sight unit vectors (spec.md 4.9). Ported from gpsd's
//! `matrix.c` / `fill_dop`, restricted to the diagonal cofactors that
//! `fill_dop` actually needs.

use crate::fix::{Dop, SkyViewEntry};

/// Singularity guard matching gpsd's `fill_dop` (near-degenerate geometry,
/// e.g. all satellites coplanar).
const DET_EPSILON: f64 = 0.0001;

/// Cofactor expansion of a 4x4 determinant.
fn det4(m: &[[f64; 4]; 4]) -> f64 {
    fn det3(m: &[[f64; 3]; 3]) -> f64 {
        m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
            - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
            + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0])
    }
    fn minor3(m: &[[f64; 4]; 4], skip_row: usize, skip_col: usize) -> [[f64; 3]; 3] {
        let mut out = [[0.0; 3]; 3];
        let mut oi = 0;
        for i in 0..4 {
            if i == skip_row {
                continue;
            }
            let mut oj = 0;
            for j in 0..4 {
                if j == skip_col {
                    continue;
                }
                out[oi][oj] = m[i][j];
                oj += 1;
            }
            oi += 1;
        }
        out
    }
    let mut det = 0.0;
    for j in 0..4 {
        let sign = if j % 2 == 0 { 1.0 } else { -1.0 };
        det += sign * m[0][j] * det3(&minor3(m, 0, j));
    }
    det
}

/// Cofactor `C[i][j]` of `m`, used to build `adj(m)^T / det(m) = m^-1`.
fn cofactor(m: &[[f64; 4]; 4], row: usize, col: usize) -> f64 {
    fn det3(m: &[[f64; 3]; 3]) -> f64 {
        m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
            - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
            + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0])
    }
    let mut minor = [[0.0; 3]; 3];
    let mut oi = 0;
    for i in 0..4 {
        if i == row {
            continue;
        }
        let mut oj = 0;
        for j in 0..4 {
            if j == col {
                continue;
            }
            minor[oi][oj] = m[i][j];
            oj += 1;
        }
        oi += 1;
    }
    let sign = if (row + col) % 2 == 0 { 1.0 } else { -1.0 };
    sign * det3(&minor)
}

/// Invert the four diagonal entries of a 4x4 matrix via cofactor
/// expansion; returns `None` if the matrix is singular.
fn invert_diagonal(m: &[[f64; 4]; 4]) -> Option<[f64; 4]> {
    let det = det4(m);
    if det.abs() < DET_EPSILON {
        return None;
    }
    let mut diag = [0.0; 4];
    for i in 0..4 {
        // m^-1[i][i] = cofactor(m, i, i) / det (symmetric matrix, adjugate transpose is a no-op on the diagonal)
        diag[i] = cofactor(m, i, i) / det;
    }
    Some(diag)
}

/// Compute DOPs from the sky view's used satellites (spec.md 4.9).
/// Returns `None` if fewer than 4 satellites are used or the geometry is
/// singular.
pub fn compute(sky_view: &[SkyViewEntry]) -> Option<Dop> {
    let mut rows: Vec<[f64; 4]> = Vec::new();
    for sat in sky_view {
        if !sat.used {
            continue;
        }
        let (Some(el), Some(az)) = (sat.elevation, sat.azimuth) else {
            continue;
        };
        let el = el.to_radians();
        let az = az.to_radians();
        rows.push([
            az.sin() * el.cos(),
            az.cos() * el.cos(),
            el.sin(),
            1.0,
        ]);
    }
    if rows.len() < 4 {
        return None;
    }

    // M = A^T . A
    let mut m = [[0.0f64; 4]; 4];
    for row in &rows {
        for i in 0..4 {
            for j in 0..4 {
                m[i][j] += row[i] * row[j];
            }
        }
    }

    let diag = invert_diagonal(&m)?;
    let xdop = diag[0].sqrt();
    let ydop = diag[1].sqrt();
    let hdop = (diag[0] + diag[1]).sqrt();
    let vdop = diag[2].sqrt();
    let pdop = (diag[0] + diag[1] + diag[2]).sqrt();
    let tdop = diag[3].sqrt();
    let gdop = (diag[0] + diag[1] + diag[2] + diag[3]).sqrt();

    Some(Dop {
        xdop: Some(xdop),
        ydop: Some(ydop),
        hdop: Some(hdop),
        vdop: Some(vdop),
        pdop: Some(pdop),
        tdop: Some(tdop),
        gdop: Some(gdop),
    })
}

/// Write computed DOPs into `dop`, but only into currently-unset slots:
/// device-reported values always win (spec.md 4.9 step 5).
pub fn fill(dop: &mut Dop, sky_view: &[SkyViewEntry]) {
    if let Some(computed) = compute(sky_view) {
        macro_rules! fill_if_none {
            ($field:ident) => {
                if dop.$field.is_none() {
                    dop.$field = computed.$field;
                }
            };
        }
        fill_if_none!(xdop);
        fill_if_none!(ydop);
        fill_if_none!(hdop);
        fill_if_none!(vdop);
        fill_if_none!(pdop);
        fill_if_none!(tdop);
        fill_if_none!(gdop);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fix::GnssId;

    fn sat(az: f64, el: f64) -> SkyViewEntry {
        let mut s = SkyViewEntry::new(1, GnssId::Gps);
        s.azimuth = Some(az);
        s.elevation = Some(el);
        s.used = true;
        s
    }

    #[test]
    fn four_satellite_geometry_matches_hand_solved_inverse() {
        // One satellite at zenith plus three on the horizon 90 degrees
        // apart (not a regular tetrahedron -- there's no satellite to the
        // north, so ydop/vdop come out above 1). Expected diag of M^-1
        // ([0.5, 1.5, 1.5, 0.5]) hand-verified by 3x3 cofactor expansion.
        let sky = vec![sat(0.0, 90.0), sat(90.0, 0.0), sat(180.0, 0.0), sat(270.0, 0.0)];
        let dop = compute(&sky).expect("non-singular geometry");
        assert!((dop.xdop.unwrap() - 0.5f64.sqrt()).abs() < 1e-9);
        assert!((dop.ydop.unwrap() - 1.5f64.sqrt()).abs() < 1e-9);
        assert!((dop.vdop.unwrap() - 1.5f64.sqrt()).abs() < 1e-9);
        assert!((dop.hdop.unwrap() - 2.0f64.sqrt()).abs() < 1e-9);
        assert!((dop.pdop.unwrap() - 3.5f64.sqrt()).abs() < 1e-9);
        assert!((dop.gdop.unwrap() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn fewer_than_four_satellites_yields_none() {
        let sky = vec![sat(0.0, 90.0), sat(90.0, 0.0)];
        assert!(compute(&sky).is_none());
    }

    #[test]
    fn device_reported_dop_is_not_overwritten() {
        let sky = vec![sat(0.0, 90.0), sat(90.0, 0.0), sat(180.0, 0.0), sat(270.0, 0.0)];
        let mut dop = Dop {
            hdop: Some(42.0),
            ..Dop::default()
        };
        fill(&mut dop, &sky);
        assert_eq!(dop.hdop, Some(42.0));
        assert!(dop.vdop.is_some());
    }
}
