//! Procedural city-geometry generator.
//!
//! Consumes declarative `CityParams` plus designer-placed axiom markers
//! and produces a fully realized 2-D city: water bodies, a hierarchical
//! road network traced through a tensor field, districts from a power
//! diagram, block polygons from the road arrangement, scored lot tokens,
//! and building sites. `generate_city` is a pure function of its inputs
//! (given `randomize_sites = false`); the result can be dumped with the
//! schema-v2 JSON exporter.
//!
//! Reference for the road tracing approach: Chen et al. 2008,
//! "Interactive Procedural Street Modeling".

pub mod blocks;
pub mod config;
pub mod district;
pub mod export;
pub mod graph;
pub mod grid;
pub mod integrator;
pub mod lots;
pub mod model;
pub mod polygon;
pub mod rng;
pub mod road_generator;
pub mod sites;
pub mod streamline;
pub mod tensor;
pub mod water;

use log::info;
use thiserror::Error;

pub use config::{
    BlockGenMode, BlockSettings, CityParams, DistrictSettings, Phase, RoadClassParams,
    RoadDefinitionMode, WaterNoiseParams, WaterParams,
};
pub use district::DistrictField;
pub use export::{city_to_json, export_city_to_json, CityJson};
pub use model::{
    AxiomInput, AxiomType, BlockDebugStats, BlockPolygon, Bounds, BuildingSite, BuildingType,
    City, District, DistrictType, InfluencerType, LotToken, LotType, Polygon, Polyline, Road,
    RoadType, UserBuildingInput, UserLotInput, UserPlacedInputs, UserRoadInput, Vec2,
};
pub use tensor::TensorField;

/// Fatal generation failures. Everything else degrades to a well-formed
/// (possibly empty) `City`.
#[derive(Debug, Error, PartialEq)]
pub enum GenerateError {
    #[error("bounds must have positive extent, got {width} x {height}")]
    InvalidBounds { width: f64, height: f64 },
    #[error("id counter overflowed in the {stage} stage")]
    IdOverflow { stage: &'static str },
}

fn check_ids(ids: &model::IdGen, stage: &'static str) -> Result<(), GenerateError> {
    if ids.overflowed() {
        Err(GenerateError::IdOverflow { stage })
    } else {
        Ok(())
    }
}

/// Run the full pipeline: water, roads, districts, blocks, lots, and
/// building sites, in that order. Phases disabled in
/// `params.phase_enabled` are skipped wholesale; later stages see their
/// empty output.
pub fn generate_city(
    params: &CityParams,
    axioms: &[AxiomInput],
    user_inputs: &UserPlacedInputs,
) -> Result<City, GenerateError> {
    if !(params.width > 0.0 && params.height > 0.0)
        || !params.width.is_finite()
        || !params.height.is_finite()
    {
        return Err(GenerateError::InvalidBounds {
            width: params.width,
            height: params.height,
        });
    }

    let mut city = City::new(Bounds::new(
        Vec2::ZERO,
        Vec2::new(params.width, params.height),
    ));

    let mut field = TensorField::from_axioms(params, axioms);
    city.water = water::generate_water(params, &mut field);

    if params.phase_enabled(Phase::Roads) {
        let water = city.water.clone();
        let ids = road_generator::generate_roads(params, &field, &water, &mut city);
        check_ids(&ids, "roads")?;
    } else {
        info!("pipeline: roads phase disabled");
    }

    let mut district_field = DistrictField::default();
    if params.phase_enabled(Phase::Districts) {
        district_field =
            district::generate(axioms, &mut city, &DistrictSettings::default(), &field);
        let ids = district::clip_roads_to_districts(&mut city, &district_field);
        check_ids(&ids, "district clipping")?;
    } else {
        info!("pipeline: districts phase disabled");
    }

    if params.phase_enabled(Phase::Blocks) {
        let mr = params.merge_radius.max(0.0);
        let settings = BlockSettings {
            // Area floor scales with the merge radius so dust faces from
            // node merging never become blocks.
            min_area: (0.02 * mr * mr).max(0.05),
            max_area: 1e8,
            merge_radius: params.merge_radius,
            snap_tolerance_factor: params.block_snap_tolerance_factor,
            verbose: params.verbose_block_diagnostics,
            ..BlockSettings::default()
        };
        let out = blocks::generate(params, &city, user_inputs, &district_field, &settings);
        city.block_polygons = out.polygons;
        city.block_faces = out.faces;
        city.block_stats = out.stats;
    } else {
        info!("pipeline: blocks phase disabled");
    }

    if params.phase_enabled(Phase::Lots) {
        let ids = lots::generate(params, &district_field, &mut city, user_inputs);
        check_ids(&ids, "lots")?;
    } else {
        info!("pipeline: lots phase disabled");
    }

    if params.phase_enabled(Phase::Buildings) {
        let ids = sites::generate(params, &mut city, user_inputs);
        check_ids(&ids, "building sites")?;
    } else {
        info!("pipeline: buildings phase disabled");
    }

    Ok(city)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::polygon::inside_polygon;

    fn small_params() -> CityParams {
        // A smaller budget keeps full-pipeline tests quick without
        // changing any semantics.
        CityParams {
            max_total_roads: 200,
            max_major_roads: 60,
            ..CityParams::default()
        }
    }

    #[test]
    fn non_positive_bounds_are_fatal() {
        let params = CityParams {
            width: 0.0,
            ..CityParams::default()
        };
        let err = generate_city(&params, &[], &UserPlacedInputs::default());
        assert!(matches!(err, Err(GenerateError::InvalidBounds { .. })));
    }

    #[test]
    fn default_world_has_single_mixed_district() {
        let params = small_params();
        let city = generate_city(&params, &[], &UserPlacedInputs::default()).expect("generate");

        assert_eq!(city.districts.len(), 1);
        let d = &city.districts[0];
        assert_eq!(d.id, 1);
        assert_eq!(d.primary_axiom_id, -1);
        assert_eq!(d.district_type, DistrictType::Mixed);
        assert_eq!(
            d.border,
            vec![
                Vec2::new(0.0, 0.0),
                Vec2::new(1000.0, 0.0),
                Vec2::new(1000.0, 1000.0),
                Vec2::new(0.0, 1000.0),
                Vec2::new(0.0, 0.0),
            ]
        );
        let total_roads: usize = RoadType::GENERATED_ORDER
            .iter()
            .map(|t| city.roads_by_type[t.index()].len())
            .sum();
        assert!(total_roads > 0, "expected roads in the default world");
    }

    #[test]
    fn pipeline_is_deterministic() {
        let params = small_params();
        let a = generate_city(&params, &[], &UserPlacedInputs::default()).expect("a");
        let b = generate_city(&params, &[], &UserPlacedInputs::default()).expect("b");
        assert_eq!(a, b);
    }

    #[test]
    fn changing_the_seed_changes_the_city() {
        let params = small_params();
        let a = generate_city(&params, &[], &UserPlacedInputs::default()).expect("a");
        let b = generate_city(
            &CityParams {
                seed: 2,
                ..small_params()
            },
            &[],
            &UserPlacedInputs::default(),
        )
        .expect("b");
        assert_ne!(
            a.roads_by_type, b.roads_by_type,
            "seed change should move at least one road"
        );
    }

    #[test]
    fn single_radial_axiom_world() {
        let params = small_params();
        let axioms = vec![AxiomInput {
            id: 0,
            axiom_type: AxiomType::Radial,
            pos: Vec2::new(500.0, 500.0),
            radius: 400.0,
            influencer: InfluencerType::None,
        }];
        let city = generate_city(&params, &axioms, &UserPlacedInputs::default()).expect("generate");

        assert_eq!(city.districts.len(), 1);
        let d = &city.districts[0];
        assert!(d.border.len() >= 4);
        assert_eq!(d.border.first(), d.border.last());
        let centre = crate::polygon::average_point(&d.border[..d.border.len() - 1]);
        assert!(centre.distance(Vec2::new(500.0, 500.0)) < 50.0);

        let total_segments: usize = RoadType::GENERATED_ORDER
            .iter()
            .map(|t| city.segment_roads_by_type[t.index()].len())
            .sum();
        assert!(total_segments > 0);
    }

    #[test]
    fn budgets_hold_across_the_pipeline() {
        let params = CityParams {
            max_total_roads: 50,
            max_major_roads: 20,
            ..CityParams::default()
        };
        let city = generate_city(&params, &[], &UserPlacedInputs::default()).expect("generate");

        let total: usize = RoadType::GENERATED_ORDER
            .iter()
            .map(|t| city.segment_roads_by_type[t.index()].len())
            .sum();
        let major: usize = RoadType::GENERATED_ORDER
            .iter()
            .filter(|t| t.is_major_group())
            .map(|t| city.segment_roads_by_type[t.index()].len())
            .sum();
        assert!(total <= 50, "total segment roads {total}");
        assert!(major <= 20, "major segment roads {major}");
        assert!(city.lots.len() <= 25);
    }

    #[test]
    fn road_interiors_avoid_the_sea() {
        let params = small_params();
        let city = generate_city(&params, &[], &UserPlacedInputs::default()).expect("generate");
        assert!(!city.water.is_empty());
        let sea = &city.water[0].points;

        // Interior samples were land-gated during tracing; only the
        // final stopping point of a line may cross the mask.
        for ty in RoadType::GENERATED_ORDER {
            for road in &city.roads_by_type[ty.index()] {
                for p in road.points.iter().skip(1).take(road.points.len().saturating_sub(2)) {
                    assert!(!inside_polygon(*p, sea), "road point {p:?} in the sea");
                }
            }
        }
    }

    #[test]
    fn lot_centroids_stay_in_bounds() {
        let params = small_params();
        let city = generate_city(&params, &[], &UserPlacedInputs::default()).expect("generate");
        for lot in &city.lots {
            assert!(city.bounds.contains(lot.centroid));
        }
    }

    #[test]
    fn disabled_phases_leave_their_slices_empty() {
        let mut params = small_params();
        params.phase_enabled[Phase::Roads as usize] = false;
        params.phase_enabled[Phase::Buildings as usize] = false;
        let city = generate_city(&params, &[], &UserPlacedInputs::default()).expect("generate");

        let total_roads: usize = RoadType::GENERATED_ORDER
            .iter()
            .map(|t| city.roads_by_type[t.index()].len())
            .sum();
        assert_eq!(total_roads, 0);
        assert!(city.building_sites.is_empty());
        // Districts still form, and the fallback block per district runs.
        assert_eq!(city.districts.len(), 1);
        assert!(!city.block_polygons.is_empty());
    }

    #[test]
    fn locked_user_lot_survives_the_pipeline() {
        let params = small_params();
        let user = UserPlacedInputs {
            lots: vec![UserLotInput {
                position: Vec2::new(500.0, 500.0),
                lot_type: LotType::LuxuryScenic,
                locked_type: true,
            }],
            lock_user_types: true,
            ..UserPlacedInputs::default()
        };
        let city = generate_city(&params, &[], &user).expect("generate");
        let first = &city.lots[0];
        assert_eq!(first.lot_type, LotType::LuxuryScenic);
        assert!(first.is_user_placed);
        assert!(first.locked_type);
    }
}
