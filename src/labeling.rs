//! Colour lookup tables and freeview argument assembly for manually tracing
//! retinotopic area boundaries on the inflated surface.

use std::path::Path;

use clap::ValueEnum;
use itertools::Itertools;
use plotters::style::{Color, HSLColor, RGBAColor};

use crate::shell::s;

#[derive(ValueEnum, Clone, Copy, PartialEq, Eq, Debug)]
pub enum Colormap {
    /// Continuous cyclic hue wheel
    Colorwheel,
    /// Vertical meridians marked red (90) and green (270) on yellow
    RedYellowGreen,
}

/// angle (degrees), r, g, b
pub type LutRow = [u16; 4];

/// Fixed scheme marking the vertical meridians: red at 90, green at 270,
/// yellow elsewhere.
pub const RED_YELLOW_GREEN: [LutRow; 9] = [
    [0, 255, 255, 0],
    [45, 255, 255, 0],
    [90, 255, 0, 0],
    [135, 255, 255, 0],
    [180, 255, 255, 0],
    [225, 255, 255, 0],
    [270, 0, 255, 0],
    [315, 255, 255, 0],
    [360, 255, 255, 0],
];

/// 37-entry hue wheel over 0..=360 in 10 degree steps.
///
/// For the left hemisphere the colour order is reversed, undoing the
/// wraparound flip previously applied to that hemisphere's data map.
pub fn colorwheel(reverse: bool) -> Vec<LutRow> {
    const N: usize = 37;
    let mut colors: Vec<[u16; 3]> = (0..N)
        .map(|i| {
            // the wheel is cyclic: 360 degrees lands back on 0
            let hue = (i as f64 / (N - 1) as f64) % 1.0;
            let RGBAColor(r, g, b, _) = HSLColor(hue, 1.0, 0.5).to_rgba();
            [r as u16, g as u16, b as u16]
        })
        .collect();
    if reverse {
        colors.reverse();
    }
    colors.into_iter()
        .enumerate()
        .map(|(i, [r, g, b])| [(i * 10) as u16, r, g, b])
        .collect()
}

pub fn lut_rows(colormap: Colormap, reverse: bool) -> Vec<LutRow> {
    match colormap {
        Colormap::Colorwheel => colorwheel(reverse),
        Colormap::RedYellowGreen => RED_YELLOW_GREEN.to_vec(),
    }
}

/// The flat comma-separated form freeview expects for `overlay_custom`.
pub fn format_lut(rows: &[LutRow]) -> String {
    rows.iter().flatten().join(",")
}

/// Arguments launching freeview on an inflated surface with the overlay,
/// custom LUT, overlay mask and existing label outline in a 3-D viewport.
pub fn freeview_args(surface: &Path, overlay: &Path, lut: &str, mask: &Path, label: &Path) -> Vec<String> {
    vec![
        "-f".into(),
        format!(
            "{}:overlay={}:curvature_method=binary:overlay_custom={lut}:overlay_smooth=8:\
             overlay_mask={}:label={}:label_outline=true:label_color=white",
            s(surface), s(overlay), s(mask), s(label),
        ),
        "-layout".into(), "1".into(),
        "-viewport".into(), "3d".into(),
    ]
}


#[cfg(test)]
mod test {
    use super::*;
    #[allow(unused)] use pretty_assertions::{assert_eq, assert_ne};

    #[test]
    fn wheel_angles_rise_monotonically_from_0_to_360() {
        for reverse in [false, true] {
            let rows = colorwheel(reverse);
            assert_eq!(rows.len(), 37);
            assert_eq!(rows[0][0], 0);
            assert_eq!(rows[36][0], 360);
            assert!(rows.windows(2).all(|w| w[0][0] < w[1][0]));
        }
    }

    #[test]
    fn hemisphere_flag_reverses_the_colour_order() {
        let forward = colorwheel(false);
        let reversed = colorwheel(true);
        let rgb = |row: &LutRow| [row[1], row[2], row[3]];
        for i in 0..37 {
            assert_eq!(rgb(&forward[i]), rgb(&reversed[36 - i]));
        }
        // while the angle column is unchanged
        for i in 0..37 {
            assert_eq!(forward[i][0], reversed[i][0]);
        }
    }

    #[test]
    fn wheel_starts_and_ends_on_red() {
        let rows = colorwheel(false);
        // the hue wheel is cyclic: both ends are pure red
        assert_eq!(&rows[0][1..], &[255, 0, 0]);
        assert_eq!(&rows[36][1..], &[255, 0, 0]);
    }

    #[test]
    fn meridian_scheme_formats_as_the_flat_freeview_list() {
        assert_eq!(
            format_lut(&RED_YELLOW_GREEN),
            "0,255,255,0,\
             45,255,255,0,\
             90,255,0,0,\
             135,255,255,0,\
             180,255,255,0,\
             225,255,255,0,\
             270,0,255,0,\
             315,255,255,0,\
             360,255,255,0",
        );
    }
}
