//! Uniform spatial hash for streamline separation tests.
//!
//! Cells are `dsep` wide; a validity query only has to look at the 3x3
//! neighbourhood around the sample's cell.

use crate::model::Vec2;

#[derive(Clone, Debug)]
pub struct GridStorage {
    world_dimensions: Vec2,
    origin: Vec2,
    grid_dimensions: (usize, usize),
    dsep: f64,
    grid: Vec<Vec<Vec<Vec2>>>,
}

impl GridStorage {
    pub fn new(world_dimensions: Vec2, origin: Vec2, dsep: f64) -> Self {
        let gx = ((world_dimensions.x / dsep).floor() as usize).max(1);
        let gy = ((world_dimensions.y / dsep).floor() as usize).max(1);
        Self {
            world_dimensions,
            origin,
            grid_dimensions: (gx, gy),
            dsep,
            grid: vec![vec![Vec::new(); gy]; gx],
        }
    }

    /// Copy every sample from `other` into this grid.
    pub fn add_all(&mut self, other: &GridStorage) {
        for column in &other.grid {
            for bucket in column {
                for &sample in bucket {
                    self.add_sample(sample);
                }
            }
        }
    }

    pub fn add_polyline(&mut self, line: &[Vec2]) {
        for &v in line {
            self.add_sample(v);
        }
    }

    /// Insert without enforcing separation.
    pub fn add_sample(&mut self, v: Vec2) {
        let (x, y) = self.sample_coords(v);
        if x < self.grid_dimensions.0 && y < self.grid_dimensions.1 {
            self.grid[x][y].push(v);
        }
    }

    /// True when `v` is at least `sqrt(d_sq)` from every stored sample.
    pub fn is_valid_sample(&self, v: Vec2, d_sq: f64) -> bool {
        let (cx, cy) = self.sample_coords(v);
        for dx in -1i64..=1 {
            for dy in -1i64..=1 {
                let x = cx as i64 + dx;
                let y = cy as i64 + dy;
                if x < 0
                    || y < 0
                    || x >= self.grid_dimensions.0 as i64
                    || y >= self.grid_dimensions.1 as i64
                {
                    continue;
                }
                let bucket = &self.grid[x as usize][y as usize];
                for sample in bucket {
                    if sample.distance_squared(v) < d_sq {
                        return false;
                    }
                }
            }
        }
        true
    }

    /// All samples in cells within roughly `distance` of `v`.
    pub fn nearby_points(&self, v: Vec2, distance: f64) -> Vec<Vec2> {
        let radius = ((distance / self.dsep) - 0.5).ceil().max(0.0) as i64;
        let (cx, cy) = self.sample_coords(v);
        let mut out = Vec::new();
        for dx in -radius..=radius {
            for dy in -radius..=radius {
                let x = cx as i64 + dx;
                let y = cy as i64 + dy;
                if x < 0
                    || y < 0
                    || x >= self.grid_dimensions.0 as i64
                    || y >= self.grid_dimensions.1 as i64
                {
                    continue;
                }
                out.extend_from_slice(&self.grid[x as usize][y as usize]);
            }
        }
        out
    }

    fn sample_coords(&self, world: Vec2) -> (usize, usize) {
        let v = world - self.origin;
        if v.x < 0.0 || v.y < 0.0 || v.x >= self.world_dimensions.x || v.y >= self.world_dimensions.y
        {
            return (0, 0);
        }
        ((v.x / self.dsep) as usize, (v.y / self.dsep) as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn separation_check_rejects_close_samples() {
        let mut grid = GridStorage::new(Vec2::new(100.0, 100.0), Vec2::ZERO, 10.0);
        grid.add_sample(Vec2::new(50.0, 50.0));
        assert!(!grid.is_valid_sample(Vec2::new(52.0, 50.0), 25.0));
        assert!(grid.is_valid_sample(Vec2::new(58.0, 50.0), 25.0));
    }

    #[test]
    fn neighbour_cells_are_searched() {
        let mut grid = GridStorage::new(Vec2::new(100.0, 100.0), Vec2::ZERO, 10.0);
        // Sample sits just across a cell boundary from the query point.
        grid.add_sample(Vec2::new(19.5, 5.0));
        assert!(!grid.is_valid_sample(Vec2::new(20.5, 5.0), 9.0));
    }

    #[test]
    fn add_all_merges_grids() {
        let mut a = GridStorage::new(Vec2::new(100.0, 100.0), Vec2::ZERO, 10.0);
        let mut b = GridStorage::new(Vec2::new(100.0, 100.0), Vec2::ZERO, 10.0);
        b.add_sample(Vec2::new(30.0, 30.0));
        a.add_all(&b);
        assert!(!a.is_valid_sample(Vec2::new(30.0, 30.0), 1.0));
    }

    #[test]
    fn nearby_points_covers_requested_radius() {
        let mut grid = GridStorage::new(Vec2::new(100.0, 100.0), Vec2::ZERO, 10.0);
        grid.add_sample(Vec2::new(35.0, 35.0));
        grid.add_sample(Vec2::new(95.0, 95.0));
        let near = grid.nearby_points(Vec2::new(30.0, 30.0), 15.0);
        assert!(near.contains(&Vec2::new(35.0, 35.0)));
        assert!(!near.contains(&Vec2::new(95.0, 95.0)));
    }
}
