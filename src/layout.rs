//! Stateless geometry algorithms over a snapshot of the open windows:
//! cascade, tile, minimized-slot allocation, and bounds clamping. All
//! functions are pure; the window store decides what to do with the
//! resulting placements.

use crate::models::{ContainerSize, SlotPosition};

pub const CASCADE_OFFSET: i32 = 32;
pub const CASCADE_MAX_WIDTH: u32 = 589;
pub const CASCADE_MAX_HEIGHT: u32 = 442;
const CASCADE_RATIO: f64 = 0.589;

pub const MINIMIZED_ICON_WIDTH: u32 = 160;
pub const MINIMIZED_ICON_HEIGHT: u32 = 32;
pub const MINIMIZED_MARGIN: i32 = 8;

/// Geometry assigned to the i-th window by a cascade pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CascadePlacement {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
    pub z_index: u32,
}

/// Grid cell assigned to the i-th window by a tile pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileCell {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

/// Staggers `count` windows diagonally at a fixed offset with a uniform
/// size, re-stacking them bottom to top in iteration order.
pub fn cascade_placements(count: usize, container: ContainerSize) -> Vec<CascadePlacement> {
    let width = CASCADE_MAX_WIDTH.min((container.width as f64 * CASCADE_RATIO) as u32);
    let height = CASCADE_MAX_HEIGHT.min((container.height as f64 * CASCADE_RATIO) as u32);
    (0..count)
        .map(|index| CascadePlacement {
            x: CASCADE_OFFSET * index as i32,
            y: CASCADE_OFFSET * index as i32,
            width,
            height,
            z_index: index as u32 + 1,
        })
        .collect()
}

/// Arranges `count` windows in a near-square grid filling the container:
/// `cols = ceil(sqrt(n))`, `rows = ceil(n / cols)`.
pub fn tile_placements(count: usize, container: ContainerSize) -> Vec<TileCell> {
    if count == 0 {
        return Vec::new();
    }
    let cols = (count as f64).sqrt().ceil() as usize;
    let rows = count.div_ceil(cols);
    let width = container.width / cols as u32;
    let height = container.height / rows as u32;
    (0..count)
        .map(|index| {
            let col = index % cols;
            let row = index / cols;
            TileCell {
                x: (col as u32 * width) as i32,
                y: (row as u32 * height) as i32,
                width,
                height,
            }
        })
        .collect()
}

/// Finds an icon slot along the bottom edge that does not overlap any
/// already-allocated slot, scanning columns left to right. When every
/// column is occupied the slot wraps and stacks at
/// `column = occupied_count % grid_cols`.
pub fn allocate_minimized_slot(occupied: &[SlotPosition], container: ContainerSize) -> SlotPosition {
    let icon_width = MINIMIZED_ICON_WIDTH as i32;
    let icon_height = MINIMIZED_ICON_HEIGHT as i32;
    let bottom_y = container.height as i32 - icon_height - MINIMIZED_MARGIN;
    let step = icon_width + MINIMIZED_MARGIN;
    let grid_cols = (((container.width as i32 - MINIMIZED_MARGIN) / step).max(1)) as usize;

    for col in 0..grid_cols {
        let x = MINIMIZED_MARGIN + col as i32 * step;
        let taken = occupied.iter().any(|slot| {
            (slot.x - x).abs() < icon_width && (slot.y - bottom_y).abs() < icon_height
        });
        if !taken {
            return SlotPosition { x, y: bottom_y };
        }
    }

    let col = occupied.len() % grid_cols;
    SlotPosition {
        x: MINIMIZED_MARGIN + col as i32 * step,
        y: bottom_y,
    }
}

/// Clamps a proposed position so the whole window stays inside the
/// container. Applied after every drag, resize, and restore.
pub fn clamp_position(
    x: i32,
    y: i32,
    width: u32,
    height: u32,
    container: ContainerSize,
) -> (i32, i32) {
    let max_x = (container.width as i32 - width as i32).max(0);
    let max_y = (container.height as i32 - height as i32).max(0);
    (x.clamp(0, max_x), y.clamp(0, max_y))
}
