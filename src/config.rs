//! Generator configuration.
//!
//! `CityParams` is the single declarative input to `generate_city`; every
//! knob has a default tuned for a 1000x1000 world. Per-class streamline
//! and graph-rule parameters live in `RoadClassParams`.

use crate::model::RoadType;

/// Which road representation downstream stages consume.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RoadDefinitionMode {
    BySegment,
    #[default]
    ByPolyline,
}

/// Block polygonizer implementation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BlockGenMode {
    #[default]
    Legacy,
    PolygonEngine,
}

/// Pipeline phases that can be skipped wholesale.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Roads = 0,
    Districts,
    Blocks,
    Lots,
    Buildings,
}

impl Phase {
    pub const COUNT: usize = 5;
}

/// Streamline and graph-rule parameters for one road class.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RoadClassParams {
    pub dsep: f64,
    pub dtest: f64,
    pub dstep: f64,
    pub dlookahead: f64,
    pub dcirclejoin: f64,
    pub joinangle: f64,
    pub path_iterations: u32,
    pub seed_tries: u32,
    pub simplify_tolerance: f64,
    pub collide_early: f64,
    pub major_direction: bool,
    pub enabled: bool,

    // Graph rules applied after all classes are drawn.
    pub prune_dangling: bool,
    pub allow_dead_ends: bool,
    pub require_dead_end: bool,
    pub min_edge_length: f64,
    pub max_edge_length: f64,
    pub allow_intersections_mask: u32,
    pub intersection_spacing: f64,
}

impl Default for RoadClassParams {
    fn default() -> Self {
        Self {
            dsep: 20.0,
            dtest: 15.0,
            dstep: 1.0,
            dlookahead: 40.0,
            dcirclejoin: 5.0,
            joinangle: 0.1,
            path_iterations: 1000,
            seed_tries: 300,
            simplify_tolerance: 0.5,
            collide_early: 0.0,
            major_direction: false,
            enabled: true,
            prune_dangling: true,
            allow_dead_ends: true,
            require_dead_end: false,
            min_edge_length: 0.0,
            max_edge_length: 0.0,
            allow_intersections_mask: u32::MAX,
            intersection_spacing: 0.0,
        }
    }
}

/// Noise overlay applied while tracing one water feature.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WaterNoiseParams {
    pub enabled: bool,
    pub size: f64,
    pub angle: f64,
}

/// Coastline and river tracing parameters.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WaterParams {
    pub dsep: f64,
    pub dtest: f64,
    pub dstep: f64,
    pub dlookahead: f64,
    pub dcirclejoin: f64,
    pub joinangle: f64,
    pub path_iterations: u32,
    pub seed_tries: u32,
    pub simplify_tolerance: f64,
    pub collide_early: f64,
    pub coast_noise: WaterNoiseParams,
    pub river_noise: WaterNoiseParams,
    pub river_bank_size: f64,
    pub river_size: f64,
}

impl Default for WaterParams {
    fn default() -> Self {
        Self {
            dsep: 20.0,
            dtest: 15.0,
            dstep: 1.0,
            dlookahead: 40.0,
            dcirclejoin: 5.0,
            joinangle: 0.1,
            path_iterations: 10_000,
            seed_tries: 300,
            simplify_tolerance: 10.0,
            collide_early: 0.0,
            coast_noise: WaterNoiseParams {
                enabled: true,
                size: 30.0,
                angle: 20.0,
            },
            river_noise: WaterNoiseParams {
                enabled: true,
                size: 30.0,
                angle: 20.0,
            },
            river_bank_size: 10.0,
            river_size: 30.0,
        }
    }
}

/// Full declarative input to the generator.
#[derive(Clone, Debug, PartialEq)]
pub struct CityParams {
    pub width: f64,
    pub height: f64,
    pub seed: u32,

    // Building site generation.
    pub randomize_sites: bool,
    pub buffer_utility_chance: f64,

    // Lot generation.
    pub min_lots_per_road_side: u32,
    pub lot_spacing_multiplier: f64,

    // Tensor field noise.
    pub tf_global_noise: bool,
    pub tf_noise_size_park: f64,
    pub tf_noise_angle_park: f64,
    pub tf_noise_size_global: f64,
    pub tf_noise_angle_global: f64,

    pub water: WaterParams,

    pub road_type_params: [RoadClassParams; RoadType::COUNT],

    // Block extraction policy.
    pub block_barrier: [bool; RoadType::COUNT],
    pub block_closure: [bool; RoadType::COUNT],
    pub debug_use_segment_roads_for_blocks: bool,
    pub block_snap_tolerance_factor: f64,
    pub merge_radius: f64,
    pub verbose_block_diagnostics: bool,

    pub max_major_roads: u32,
    pub max_total_roads: u32,
    pub major_to_minor_ratio: f64,
    pub road_definition_mode: RoadDefinitionMode,
    pub block_gen_mode: BlockGenMode,

    /// Roads, Districts, Blocks, Lots, Buildings.
    pub phase_enabled: [bool; Phase::COUNT],
}

impl CityParams {
    pub fn phase_enabled(&self, phase: Phase) -> bool {
        self.phase_enabled[phase as usize]
    }
}

impl Default for CityParams {
    fn default() -> Self {
        let mut road_type_params = [RoadClassParams::default(); RoadType::COUNT];

        let mut set_class = |ty: RoadType,
                             dsep: f64,
                             dtest: f64,
                             dlookahead: f64,
                             major: bool,
                             prune: bool,
                             enabled: bool| {
            let p = &mut road_type_params[ty.index()];
            p.dsep = dsep;
            p.dtest = dtest;
            p.dlookahead = dlookahead;
            p.major_direction = major;
            p.prune_dangling = prune;
            p.enabled = enabled;
        };

        set_class(RoadType::Highway, 600.0, 250.0, 600.0, true, true, true);
        set_class(RoadType::Arterial, 350.0, 180.0, 400.0, true, true, true);
        set_class(RoadType::Avenue, 250.0, 140.0, 300.0, true, true, true);
        set_class(RoadType::Boulevard, 200.0, 120.0, 240.0, true, true, true);
        set_class(RoadType::Street, 120.0, 60.0, 140.0, false, true, true);
        set_class(RoadType::Lane, 80.0, 45.0, 100.0, false, true, true);
        set_class(RoadType::Alleyway, 50.0, 30.0, 70.0, false, true, true);
        set_class(RoadType::CulDeSac, 40.0, 25.0, 50.0, false, false, true);
        set_class(RoadType::Drive, 60.0, 35.0, 80.0, false, true, true);
        set_class(RoadType::Driveway, 25.0, 15.0, 30.0, false, false, false);

        // Highways only meet the larger classes (plus drives for ramps).
        let highway_mask = RoadType::Highway.bit()
            | RoadType::Arterial.bit()
            | RoadType::Avenue.bit()
            | RoadType::Boulevard.bit()
            | RoadType::Street.bit()
            | RoadType::Drive.bit();
        road_type_params[RoadType::Highway.index()].allow_intersections_mask = highway_mask;
        road_type_params[RoadType::Highway.index()].allow_dead_ends = false;
        road_type_params[RoadType::CulDeSac.index()].require_dead_end = true;
        road_type_params[RoadType::Driveway.index()].require_dead_end = true;

        let mut block_closure = [true; RoadType::COUNT];
        block_closure[RoadType::Highway.index()] = false;
        block_closure[RoadType::Arterial.index()] = false;

        Self {
            width: 1000.0,
            height: 1000.0,
            seed: 1,
            randomize_sites: false,
            buffer_utility_chance: 0.35,
            min_lots_per_road_side: 1,
            lot_spacing_multiplier: 1.5,
            tf_global_noise: false,
            tf_noise_size_park: 50.0,
            tf_noise_angle_park: 0.0,
            tf_noise_size_global: 100.0,
            tf_noise_angle_global: 0.0,
            water: WaterParams::default(),
            road_type_params,
            block_barrier: [true; RoadType::COUNT],
            block_closure,
            debug_use_segment_roads_for_blocks: false,
            block_snap_tolerance_factor: 0.25,
            merge_radius: 20.0,
            verbose_block_diagnostics: false,
            max_major_roads: 1200,
            max_total_roads: 4000,
            major_to_minor_ratio: 0.3,
            road_definition_mode: RoadDefinitionMode::ByPolyline,
            block_gen_mode: BlockGenMode::Legacy,
            phase_enabled: [true; Phase::COUNT],
        }
    }
}

/// District assignment knobs. These stay at their defaults in the normal
/// pipeline; tests and tools may tweak them directly.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DistrictSettings {
    pub grid_resolution: u32,
    pub secondary_threshold: f64,
    pub weight_scale: f64,
    pub use_reaction_diffusion: bool,
    pub rd_mix: f64,
    pub desire_weight_axiom: f64,
    pub desire_weight_frontage: f64,
    pub disable_weight_normalization: bool,
    pub desire_score_epsilon: f64,
    pub enable_desire_geometry_factor: bool,
    pub desire_density_radius: f64,
    pub enable_adaptive_resolution: bool,
    pub min_grid_resolution: u32,
    pub max_grid_resolution: u32,
    pub split_disconnected_regions: bool,
    pub use_local_secondary_cutoff: bool,
    pub fixed_secondary_cutoff: f64,
}

impl Default for DistrictSettings {
    fn default() -> Self {
        Self {
            grid_resolution: 128,
            secondary_threshold: 0.2,
            weight_scale: 1.0,
            use_reaction_diffusion: false,
            rd_mix: 0.0,
            desire_weight_axiom: 0.6,
            desire_weight_frontage: 0.4,
            disable_weight_normalization: false,
            desire_score_epsilon: 1e-6,
            enable_desire_geometry_factor: false,
            desire_density_radius: 200.0,
            enable_adaptive_resolution: false,
            min_grid_resolution: 64,
            max_grid_resolution: 512,
            split_disconnected_regions: true,
            use_local_secondary_cutoff: true,
            fixed_secondary_cutoff: 0.15,
        }
    }
}

/// Block polygonizer settings, derived from `CityParams` by the blocks
/// stage.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BlockSettings {
    pub min_area: f64,
    pub max_area: f64,
    pub merge_radius: f64,
    pub snap_tolerance_factor: f64,
    pub near_miss_tolerance: f64,
    pub enable_near_miss_splitting: bool,
    pub guard_largest_face_removal: bool,
    pub largest_face_threshold: f64,
    pub verbose: bool,
}

impl Default for BlockSettings {
    fn default() -> Self {
        Self {
            min_area: 1e-6,
            max_area: 1e8,
            merge_radius: 20.0,
            snap_tolerance_factor: 0.25,
            near_miss_tolerance: 5.0,
            enable_near_miss_splitting: true,
            guard_largest_face_removal: true,
            largest_face_threshold: 5.0,
            verbose: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_disable_driveways_only() {
        let params = CityParams::default();
        for ty in RoadType::GENERATED_ORDER {
            let enabled = params.road_type_params[ty.index()].enabled;
            assert_eq!(enabled, ty != RoadType::Driveway, "{:?}", ty);
        }
    }

    #[test]
    fn highway_and_arterial_never_close_blocks() {
        let params = CityParams::default();
        assert!(!params.block_closure[RoadType::Highway.index()]);
        assert!(!params.block_closure[RoadType::Arterial.index()]);
        assert!(params.block_closure[RoadType::Street.index()]);
    }

    #[test]
    fn dead_end_rules_follow_class_roles() {
        let params = CityParams::default();
        assert!(!params.road_type_params[RoadType::Highway.index()].allow_dead_ends);
        assert!(params.road_type_params[RoadType::CulDeSac.index()].require_dead_end);
        assert!(params.road_type_params[RoadType::Driveway.index()].require_dead_end);
    }
}
