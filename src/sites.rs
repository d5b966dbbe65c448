//! Building site placement.
//!
//! Each lot implies an oriented rectangle aligned to its nearest road;
//! sites are drawn from it with a per-lot deterministic RNG. Lots on
//! minor roads with weak desirability get demoted to residential-grade
//! buildings.

use log::info;

use crate::config::CityParams;
use crate::model::{BuildingSite, BuildingType, City, IdGen, LotToken, LotType, RoadType, Vec2};
use crate::rng::DetRng;

struct OrientedRect {
    center: Vec2,
    dir: Vec2,
    normal: Vec2,
    half_width: f64,
    half_depth: f64,
}

fn nearest_road_direction(city: &City, pos: Vec2) -> Option<Vec2> {
    let mut best = f64::MAX;
    let mut best_dir = None;
    for segments in &city.segment_roads_by_type {
        for road in segments {
            if road.points.len() < 2 {
                continue;
            }
            for w in road.points.windows(2) {
                let d = crate::polygon::distance_to_segment(pos, w[0], w[1]);
                if d < best {
                    let dir = w[1] - w[0];
                    if dir.length() > 0.0 {
                        best = d;
                        best_dir = Some(dir.normalize());
                    }
                }
            }
        }
    }
    best_dir
}

fn is_minor_road(ty: RoadType) -> bool {
    matches!(
        ty,
        RoadType::Lane | RoadType::Alleyway | RoadType::CulDeSac | RoadType::Drive | RoadType::Driveway
    )
}

fn desirability_score(lot: &LotToken) -> f64 {
    0.50 * lot.access + 0.35 * lot.exposure + 0.15 * lot.serviceability
}

fn building_type_for(lot: &LotToken) -> BuildingType {
    let minor = is_minor_road(lot.primary_road);
    let allow_major = !minor || desirability_score(lot) >= 0.75;

    if !allow_major {
        return match lot.lot_type {
            LotType::RowhomeCompact => BuildingType::Rowhome,
            LotType::BufferStrip => BuildingType::Utility,
            _ => BuildingType::Residential,
        };
    }

    match lot.lot_type {
        LotType::Residential => BuildingType::Residential,
        LotType::RowhomeCompact => BuildingType::Rowhome,
        LotType::RetailStrip => BuildingType::Retail,
        LotType::MixedUse => BuildingType::MixedUse,
        LotType::LogisticsIndustrial => BuildingType::Industrial,
        LotType::CivicCultural => BuildingType::Civic,
        LotType::LuxuryScenic => BuildingType::Luxury,
        LotType::BufferStrip => BuildingType::Utility,
        LotType::None => BuildingType::None,
    }
}

fn base_dimensions(ty: LotType) -> (f64, f64) {
    match ty {
        LotType::Residential => (26.0, 34.0),
        LotType::RowhomeCompact => (18.0, 28.0),
        LotType::RetailStrip => (40.0, 30.0),
        LotType::MixedUse => (32.0, 36.0),
        LotType::LogisticsIndustrial => (60.0, 50.0),
        LotType::CivicCultural => (46.0, 38.0),
        LotType::LuxuryScenic => (34.0, 42.0),
        LotType::BufferStrip => (20.0, 20.0),
        LotType::None => (24.0, 30.0),
    }
}

fn implied_lot_rect(city: &City, lot: &LotToken) -> OrientedRect {
    let dir = nearest_road_direction(city, lot.centroid).unwrap_or(Vec2::X);
    let normal = Vec2::new(-dir.y, dir.x).normalize_or_zero();
    let (base_w, base_d) = base_dimensions(lot.lot_type);

    let frontage_factor = 0.6 + 0.6 * lot.access + 0.4 * lot.exposure;
    let depth_factor = 0.6 + 0.6 * lot.privacy + 0.2 * lot.serviceability;
    let width = (base_w * frontage_factor).clamp(12.0, 120.0);
    let depth = (base_d * depth_factor).clamp(12.0, 120.0);

    OrientedRect {
        center: lot.centroid,
        dir,
        normal,
        half_width: width * 0.5,
        half_depth: depth * 0.5,
    }
}

fn make_rng(params: &CityParams, lot_id: u32) -> DetRng {
    if params.randomize_sites {
        return DetRng::from_entropy();
    }
    let mixed = (params.seed as u64) ^ (lot_id as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15);
    DetRng::new((mixed & 0xFFFF_FFFF) as u32)
}

fn sites_per_lot(params: &CityParams, ty: LotType, rng: &mut DetRng) -> i32 {
    match ty {
        LotType::Residential => rng.uniform_int(1, 2),
        LotType::RowhomeCompact => rng.uniform_int(2, 6),
        LotType::RetailStrip => rng.uniform_int(1, 3),
        LotType::MixedUse => rng.uniform_int(1, 2),
        LotType::LogisticsIndustrial | LotType::CivicCultural => 1,
        LotType::LuxuryScenic => rng.uniform_int(1, 2),
        LotType::BufferStrip => {
            if rng.uniform() < params.buffer_utility_chance {
                1
            } else {
                0
            }
        }
        LotType::None => 0,
    }
}

fn sample_point(rect: &OrientedRect, rng: &mut DetRng) -> Vec2 {
    let x = rng.uniform_range(-rect.half_width, rect.half_width);
    let y = rng.uniform_range(-rect.half_depth, rect.half_depth);
    rect.center + rect.dir * x + rect.normal * y
}

/// Place building sites for every lot. User buildings install first.
pub fn generate(params: &CityParams, city: &mut City, user_inputs: &crate::model::UserPlacedInputs) -> IdGen {
    info!(
        "sites: start, {} lots, {} user buildings",
        city.lots.len(),
        user_inputs.buildings.len()
    );
    let mut ids = IdGen::new();
    let mut sites: Vec<BuildingSite> = Vec::new();

    for user_building in &user_inputs.buildings {
        sites.push(BuildingSite {
            id: ids.next(),
            lot_id: 0,
            district_id: 0,
            position: user_building.position,
            building_type: user_building.building_type,
            is_user_placed: true,
            locked_type: user_inputs.lock_user_types || user_building.locked_type,
        });
    }

    for lot in &city.lots {
        if lot.lot_type == LotType::None {
            continue;
        }
        let mut rng = make_rng(params, lot.id);
        let count = sites_per_lot(params, lot.lot_type, &mut rng);
        if count <= 0 {
            continue;
        }

        let rect = implied_lot_rect(city, lot);
        let building_type = building_type_for(lot);
        for _ in 0..count {
            sites.push(BuildingSite {
                id: ids.next(),
                lot_id: lot.id,
                district_id: lot.district_id,
                position: sample_point(&rect, &mut rng),
                building_type,
                is_user_placed: false,
                locked_type: false,
            });
        }
    }

    info!("sites: done, {} sites", sites.len());
    city.building_sites = sites;
    ids
}
