//! Lot placement and typology scoring.
//!
//! Lots are scored points: each gets AESP frontage scores blended from
//! its two nearest road classes, then a typology chosen by threshold
//! gates, weighted scores, and class/district bonuses. Placement walks
//! road frontages at district-scaled spacing, infills block interiors
//! with rejection sampling, and marks large intersections.

use log::{debug, info};

use crate::config::{CityParams, RoadDefinitionMode};
use crate::district::DistrictField;
use crate::graph::Graph;
use crate::model::{
    City, District, DistrictType, IdGen, LotToken, LotType, RoadType, UserPlacedInputs, Vec2,
};
use crate::polygon;
use crate::rng::DetRng;

/// Fixed access/exposure/serviceability/privacy tuple for a road class.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct FrontageProfile {
    pub access: f64,
    pub exposure: f64,
    pub serviceability: f64,
    pub privacy: f64,
}

/// Frontage profile table, one row per road class.
pub fn frontage_profile(road_type: RoadType) -> FrontageProfile {
    let (access, exposure, serviceability, privacy) = match road_type {
        RoadType::Highway => (1.00, 1.00, 0.70, 0.00),
        RoadType::Arterial => (0.90, 0.90, 0.90, 0.20),
        RoadType::Avenue => (0.80, 0.80, 0.80, 0.50),
        RoadType::Boulevard => (0.70, 0.90, 0.50, 0.70),
        RoadType::Street => (0.80, 0.50, 0.80, 0.80),
        RoadType::Lane => (0.50, 0.20, 0.50, 1.00),
        RoadType::Alleyway => (0.30, 0.10, 1.00, 0.70),
        RoadType::CulDeSac => (0.30, 0.20, 0.50, 1.00),
        RoadType::Drive => (0.50, 0.30, 0.60, 0.90),
        RoadType::Driveway => (0.20, 0.05, 0.70, 1.00),
        RoadType::MMajor => (0.90, 0.90, 0.90, 0.20),
        RoadType::MMinor => (0.80, 0.50, 0.80, 0.80),
    };
    FrontageProfile {
        access,
        exposure,
        serviceability,
        privacy,
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct Scores {
    pub a: f64,
    pub e: f64,
    pub s: f64,
    pub p: f64,
}

/// AESP blend of primary and secondary frontage profiles. Without a
/// secondary, its profile contributes zeros.
pub fn compute_scores(primary: RoadType, secondary: RoadType, has_secondary: bool) -> Scores {
    let p = frontage_profile(primary);
    let s = if has_secondary {
        frontage_profile(secondary)
    } else {
        FrontageProfile::default()
    };
    Scores {
        a: 0.85 * p.access + 0.15 * s.access,
        e: 0.90 * p.exposure + 0.10 * s.exposure,
        s: 0.65 * p.serviceability + 0.35 * s.serviceability,
        p: 0.80 * p.privacy + 0.20 * s.privacy,
    }
}

fn thresholds_pass(ty: LotType, s: &Scores) -> bool {
    match ty {
        LotType::LogisticsIndustrial => s.s >= 0.80 && s.a >= 0.70,
        LotType::RetailStrip => s.e >= 0.80 && s.a >= 0.60,
        LotType::MixedUse => s.e >= 0.70 && s.a >= 0.60 && s.p >= 0.30,
        LotType::CivicCultural => s.e >= 0.80 && s.p >= 0.40,
        LotType::Residential => s.p >= 0.60 && s.a >= 0.55,
        LotType::LuxuryScenic => s.p >= 0.80 && s.a >= 0.45,
        LotType::RowhomeCompact => s.a >= 0.55 && s.p >= 0.50 && s.e <= 0.60,
        LotType::BufferStrip => true,
        LotType::None => false,
    }
}

fn weighted_score(ty: LotType, s: &Scores) -> f64 {
    match ty {
        LotType::LogisticsIndustrial => 0.35 * s.a + 0.05 * s.e + 0.55 * s.s + 0.05 * s.p,
        LotType::RetailStrip => 0.35 * s.a + 0.55 * s.e + 0.05 * s.s + 0.05 * s.p,
        LotType::MixedUse => 0.30 * s.a + 0.45 * s.e + 0.15 * s.s + 0.10 * s.p,
        LotType::CivicCultural => 0.10 * s.a + 0.60 * s.e + 0.05 * s.s + 0.25 * s.p,
        LotType::Residential => 0.25 * s.a + 0.05 * s.e + 0.10 * s.s + 0.60 * s.p,
        LotType::LuxuryScenic => 0.20 * s.a + 0.10 * s.e + 0.10 * s.s + 0.60 * s.p,
        LotType::RowhomeCompact => 0.35 * s.a - 0.15 * s.e + 0.10 * s.s + 0.70 * s.p,
        LotType::BufferStrip | LotType::None => 0.0,
    }
}

fn primary_bonus(ty: LotType, primary: RoadType) -> f64 {
    match ty {
        LotType::LogisticsIndustrial => match primary {
            RoadType::Highway | RoadType::Arterial => 0.25,
            RoadType::Avenue => 0.10,
            _ => 0.0,
        },
        LotType::RetailStrip => match primary {
            RoadType::Arterial => 0.30,
            RoadType::Boulevard => 0.20,
            RoadType::Avenue => 0.15,
            _ => 0.0,
        },
        LotType::MixedUse => match primary {
            RoadType::Avenue | RoadType::Boulevard | RoadType::Street => 0.15,
            _ => 0.0,
        },
        LotType::CivicCultural => match primary {
            RoadType::Boulevard => 0.30,
            RoadType::Avenue => 0.20,
            _ => 0.0,
        },
        LotType::Residential => match primary {
            RoadType::Street => 0.25,
            RoadType::Lane | RoadType::Drive => 0.20,
            RoadType::CulDeSac => 0.15,
            _ => 0.0,
        },
        LotType::LuxuryScenic => match primary {
            RoadType::Drive => 0.30,
            RoadType::Boulevard | RoadType::CulDeSac => 0.25,
            _ => 0.0,
        },
        LotType::RowhomeCompact => match primary {
            RoadType::Lane => 0.25,
            RoadType::Street => 0.20,
            _ => 0.0,
        },
        LotType::BufferStrip => {
            if primary == RoadType::Highway {
                1.0
            } else {
                0.0
            }
        }
        LotType::None => 0.0,
    }
}

fn secondary_bonus(ty: LotType, secondary: RoadType, has_secondary: bool) -> f64 {
    if !has_secondary {
        return 0.0;
    }
    match ty {
        LotType::LogisticsIndustrial => match secondary {
            RoadType::Alleyway => 0.25,
            RoadType::Driveway => 0.10,
            _ => 0.0,
        },
        LotType::RetailStrip => match secondary {
            RoadType::Alleyway => 0.20,
            _ => 0.0,
        },
        LotType::MixedUse => match secondary {
            RoadType::Alleyway => 0.20,
            RoadType::Lane => 0.10,
            _ => 0.0,
        },
        LotType::CivicCultural => match secondary {
            RoadType::Alleyway => 0.10,
            _ => 0.0,
        },
        LotType::Residential | LotType::LuxuryScenic => match secondary {
            RoadType::Lane | RoadType::Driveway => 0.10,
            _ => 0.0,
        },
        LotType::RowhomeCompact => match secondary {
            RoadType::Alleyway => 0.20,
            RoadType::Driveway => 0.10,
            _ => 0.0,
        },
        LotType::BufferStrip | LotType::None => 0.0,
    }
}

fn combo_bonus(ty: LotType, primary: RoadType, secondary: RoadType, has_secondary: bool) -> f64 {
    if !has_secondary {
        return 0.0;
    }
    match ty {
        LotType::LogisticsIndustrial => match (primary, secondary) {
            (RoadType::Arterial, RoadType::Alleyway) => 0.35,
            (RoadType::Highway, RoadType::Alleyway) => 0.20,
            (RoadType::Avenue, RoadType::Alleyway) => 0.15,
            _ => 0.0,
        },
        LotType::RetailStrip => match (primary, secondary) {
            (RoadType::Arterial, RoadType::Alleyway) => 0.35,
            (RoadType::Boulevard, RoadType::Alleyway) => 0.25,
            (RoadType::Avenue, RoadType::Alleyway) => 0.20,
            _ => 0.0,
        },
        LotType::MixedUse => match (primary, secondary) {
            (RoadType::Avenue, RoadType::Alleyway) => 0.25,
            (RoadType::Boulevard, RoadType::Alleyway) => 0.20,
            (RoadType::Street, RoadType::Alleyway) => 0.15,
            _ => 0.0,
        },
        LotType::CivicCultural => match (primary, secondary) {
            (RoadType::Boulevard, RoadType::Alleyway) => 0.15,
            (RoadType::Avenue, RoadType::Alleyway) => 0.10,
            _ => 0.0,
        },
        LotType::Residential => match (primary, secondary) {
            (RoadType::Street, RoadType::Lane) => 0.15,
            (RoadType::Lane, RoadType::Driveway) => 0.15,
            (RoadType::Drive, RoadType::Lane) => 0.10,
            _ => 0.0,
        },
        LotType::LuxuryScenic => match (primary, secondary) {
            (RoadType::Drive, RoadType::Lane) => 0.15,
            (RoadType::Boulevard, RoadType::Driveway) => 0.10,
            (RoadType::CulDeSac, RoadType::Driveway) => 0.10,
            _ => 0.0,
        },
        LotType::RowhomeCompact => match (primary, secondary) {
            (RoadType::Lane, RoadType::Alleyway) => 0.25,
            (RoadType::Street, RoadType::Alleyway) => 0.20,
            _ => 0.0,
        },
        LotType::BufferStrip | LotType::None => 0.0,
    }
}

fn district_multiplier(district_type: DistrictType, ty: LotType) -> f64 {
    match district_type {
        DistrictType::Residential => {
            if matches!(ty, LotType::Residential | LotType::RowhomeCompact) {
                0.20
            } else {
                0.0
            }
        }
        DistrictType::Commercial => {
            if matches!(ty, LotType::RetailStrip | LotType::MixedUse) {
                0.20
            } else {
                0.0
            }
        }
        DistrictType::Civic => {
            if ty == LotType::CivicCultural {
                0.25
            } else {
                0.0
            }
        }
        DistrictType::Industrial => {
            if ty == LotType::LogisticsIndustrial {
                0.25
            } else {
                0.0
            }
        }
        DistrictType::Mixed => 0.0,
    }
}

fn road_spacing_multiplier(ty: RoadType) -> f64 {
    match ty {
        RoadType::Highway => 2.0,
        RoadType::Arterial => 1.6,
        RoadType::Avenue => 1.3,
        RoadType::Boulevard => 1.2,
        RoadType::Street => 0.75,
        RoadType::Lane => 0.55,
        RoadType::Alleyway => 0.5,
        RoadType::CulDeSac => 0.6,
        RoadType::Drive => 0.6,
        RoadType::Driveway => 0.5,
        _ => 1.0,
    }
}

/// Typology selection. Highways without a sensible secondary force a
/// buffer strip; otherwise the best gated type wins, with an E/P
/// fallback when nothing passes its gate.
pub fn classify_lot(
    primary: RoadType,
    secondary: RoadType,
    has_secondary: bool,
    district_type: DistrictType,
) -> (LotType, f64) {
    if primary == RoadType::Highway {
        let secondary_ok = has_secondary
            && matches!(
                secondary,
                RoadType::Arterial
                    | RoadType::Avenue
                    | RoadType::Boulevard
                    | RoadType::Street
                    | RoadType::Lane
            );
        if !secondary_ok {
            return (LotType::BufferStrip, 0.0);
        }
    }

    let s = compute_scores(primary, secondary, has_secondary);
    const TYPES: [LotType; 8] = [
        LotType::Residential,
        LotType::RowhomeCompact,
        LotType::RetailStrip,
        LotType::MixedUse,
        LotType::LogisticsIndustrial,
        LotType::CivicCultural,
        LotType::LuxuryScenic,
        LotType::BufferStrip,
    ];

    let mut best_type = LotType::BufferStrip;
    let mut best_score = -1e9;
    let mut any_passed = false;
    for ty in TYPES {
        if !thresholds_pass(ty, &s) {
            continue;
        }
        any_passed = true;
        let score = weighted_score(ty, &s)
            + primary_bonus(ty, primary)
            + secondary_bonus(ty, secondary, has_secondary)
            + combo_bonus(ty, primary, secondary, has_secondary)
            + district_multiplier(district_type, ty);
        if score > best_score {
            best_score = score;
            best_type = ty;
        }
    }

    if !any_passed {
        best_type = if s.e >= 0.75 {
            LotType::RetailStrip
        } else if s.p >= 0.60 {
            LotType::Residential
        } else {
            LotType::MixedUse
        };
        best_score = weighted_score(best_type, &s)
            + primary_bonus(best_type, primary)
            + district_multiplier(district_type, best_type);
    }
    (best_type, best_score)
}

#[derive(Clone, Copy, Debug)]
struct RoadCandidate {
    road_type: RoadType,
    distance: f64,
    valid: bool,
}

impl Default for RoadCandidate {
    fn default() -> Self {
        Self {
            road_type: RoadType::Street,
            distance: 1e9,
            valid: false,
        }
    }
}

fn check_polyline(
    points: &[Vec2],
    ty: RoadType,
    primary: &mut RoadCandidate,
    secondary: &mut RoadCandidate,
    pos: Vec2,
) {
    if points.len() < 2 {
        return;
    }
    let mut best = f64::MAX;
    for w in points.windows(2) {
        best = best.min(polygon::distance_to_segment(pos, w[0], w[1]));
    }
    if best < primary.distance {
        *secondary = *primary;
        *primary = RoadCandidate {
            road_type: ty,
            distance: best,
            valid: true,
        };
    } else if best < secondary.distance {
        *secondary = RoadCandidate {
            road_type: ty,
            distance: best,
            valid: true,
        };
    }
}

/// Nearest and second-nearest road classes to `pos`, searching segment
/// roads first then the polyline forms.
fn nearest_road(city: &City, pos: Vec2) -> (RoadCandidate, RoadCandidate) {
    let mut primary = RoadCandidate::default();
    let mut secondary = RoadCandidate::default();
    for ty in RoadType::GENERATED_ORDER {
        for road in &city.segment_roads_by_type[ty.index()] {
            check_polyline(&road.points, ty, &mut primary, &mut secondary, pos);
        }
    }
    for ty in RoadType::GENERATED_ORDER {
        for road in &city.roads_by_type[ty.index()] {
            check_polyline(&road.points, ty, &mut primary, &mut secondary, pos);
        }
    }
    (primary, secondary)
}

fn polyline_length(points: &[Vec2]) -> f64 {
    points.windows(2).map(|w| w[0].distance(w[1])).sum()
}

fn point_at_distance(points: &[Vec2], dist: f64) -> Vec2 {
    if points.len() < 2 {
        return points.first().copied().unwrap_or(Vec2::ZERO);
    }
    let mut traveled = 0.0;
    for w in points.windows(2) {
        let seg_len = w[0].distance(w[1]);
        if traveled + seg_len >= dist {
            let t = if seg_len > 0.0 {
                (dist - traveled) / seg_len
            } else {
                0.0
            };
            return w[0].lerp(w[1], t);
        }
        traveled += seg_len;
    }
    points[points.len() - 1]
}

fn direction_at_distance(points: &[Vec2], dist: f64) -> Vec2 {
    if points.len() < 2 {
        return Vec2::X;
    }
    let mut traveled = 0.0;
    for w in points.windows(2) {
        let seg_len = w[0].distance(w[1]);
        if traveled + seg_len >= dist {
            return (w[1] - w[0]).normalize_or_zero();
        }
        traveled += seg_len;
    }
    (points[points.len() - 1] - points[points.len() - 2]).normalize_or_zero()
}

fn district_type_for(districts: &[District], district_id: u32) -> DistrictType {
    if district_id == 0 || district_id as usize > districts.len() {
        return DistrictType::Mixed;
    }
    districts[(district_id - 1) as usize].district_type
}

fn district_scales(ty: DistrictType) -> (f64, f64) {
    match ty {
        DistrictType::Residential => (0.75, 1.05),
        DistrictType::Commercial => (0.65, 0.95),
        DistrictType::Civic => (0.85, 1.10),
        DistrictType::Industrial => (1.20, 1.30),
        DistrictType::Mixed => (1.0, 1.0),
    }
}

fn too_close_to_existing(lots: &[LotToken], pos: Vec2, radius: f64) -> bool {
    let r2 = radius * radius;
    lots.iter().any(|lot| pos.distance_squared(lot.centroid) <= r2)
}

fn point_inside_block(p: Vec2, block: &crate::model::BlockPolygon) -> bool {
    if !polygon::inside_polygon(p, &block.outer) {
        return false;
    }
    !block.holes.iter().any(|hole| polygon::inside_polygon(p, hole))
}

/// Place all lot tokens on `city`. Blocks must already be generated.
pub fn generate(
    params: &CityParams,
    field: &DistrictField,
    city: &mut City,
    user_inputs: &UserPlacedInputs,
) -> IdGen {
    info!(
        "lots: start, {} user lots, mode={:?}",
        user_inputs.lots.len(),
        params.road_definition_mode
    );

    let texture_scale = ((params.width * params.height) / 1_000_000.0)
        .sqrt()
        .clamp(0.5, 2.0);
    let base_spacing = 80.0 * texture_scale * params.lot_spacing_multiplier;
    let min_spacing = 10.0 * texture_scale;
    let base_depth = 50.0 * texture_scale;
    let min_lots_per_side = params.min_lots_per_road_side.clamp(1, 10) as f64;

    let max_lots = if params.max_total_roads > 0 {
        (params.max_total_roads / 2) as usize
    } else {
        0
    };
    let mut ids = IdGen::new();
    let mut lots: Vec<LotToken> = Vec::new();
    let reached_max = |lots: &Vec<LotToken>| max_lots > 0 && lots.len() >= max_lots;

    // User-placed lots install first and keep their types when locked.
    for user_lot in &user_inputs.lots {
        lots.push(LotToken {
            id: ids.next(),
            district_id: field.sample_id(user_lot.position),
            centroid: user_lot.position,
            lot_type: user_lot.lot_type,
            is_user_placed: true,
            locked_type: user_inputs.lock_user_types || user_lot.locked_type,
            ..LotToken::default()
        });
    }

    let segment_spacing = params.road_definition_mode == RoadDefinitionMode::BySegment;
    let mut budget_hit = false;

    'road_classes: for ty in RoadType::ALL {
        if ty.is_user_type() {
            continue;
        }
        let spacing_multiplier = road_spacing_multiplier(ty);

        // Local copy of the paths so lots can be pushed while walking.
        let paths: Vec<Vec<Vec2>> = city.roads_by_type[ty.index()]
            .iter()
            .map(|p| p.points.clone())
            .collect();

        for points in &paths {
            if points.len() < 2 {
                continue;
            }

            let spans: Vec<(Vec<Vec2>, f64)> = if segment_spacing {
                points
                    .windows(2)
                    .map(|w| (vec![w[0], w[1]], w[0].distance(w[1])))
                    .collect()
            } else {
                vec![(points.clone(), polyline_length(points))]
            };

            for (span, length) in spans {
                if length <= 0.0 {
                    continue;
                }
                let mid = point_at_distance(&span, length * 0.5);
                let district_id = field.sample_id(mid);
                let district_type = district_type_for(&city.districts, district_id);
                let (spacing_scale, depth_scale) = district_scales(district_type);
                let mut lot_spacing =
                    (base_spacing * spacing_scale * spacing_multiplier).max(min_spacing);
                let lot_depth = (base_depth * depth_scale).max(15.0);

                // Guarantee a minimum number of lots per side.
                let max_spacing_for_min = length / min_lots_per_side;
                if lot_spacing > max_spacing_for_min && length > min_spacing {
                    lot_spacing = max_spacing_for_min.max(min_spacing);
                }

                let start = if length < lot_spacing {
                    length * 0.5
                } else {
                    lot_spacing * 0.5
                };
                let mut dist = start;
                while dist <= length {
                    if reached_max(&lots) {
                        budget_hit = true;
                        break 'road_classes;
                    }
                    let pos = point_at_distance(&span, dist);
                    let dir = direction_at_distance(&span, dist);
                    let normal = Vec2::new(-dir.y, dir.x);

                    for side in [1.0, -1.0] {
                        let centroid = pos + normal * (lot_depth * 0.5 * side);
                        if !city.bounds.contains(centroid) {
                            continue;
                        }

                        let (mut primary, secondary) = nearest_road(city, centroid);
                        if !primary.valid {
                            primary = RoadCandidate {
                                road_type: ty,
                                distance: 0.0,
                                valid: true,
                            };
                        }
                        let has_secondary =
                            secondary.valid && secondary.distance <= primary.distance * 2.25;
                        let secondary_type = if has_secondary {
                            secondary.road_type
                        } else {
                            primary.road_type
                        };

                        let scores =
                            compute_scores(primary.road_type, secondary_type, has_secondary);
                        let lot_district = field.sample_id(centroid);
                        let (lot_type, _) = classify_lot(
                            primary.road_type,
                            secondary_type,
                            has_secondary,
                            district_type_for(&city.districts, lot_district),
                        );
                        lots.push(LotToken {
                            id: ids.next(),
                            district_id: lot_district,
                            centroid,
                            primary_road: primary.road_type,
                            secondary_road: secondary_type,
                            access: scores.a,
                            exposure: scores.e,
                            serviceability: scores.s,
                            privacy: scores.p,
                            lot_type,
                            is_user_placed: false,
                            locked_type: false,
                        });
                        if reached_max(&lots) {
                            budget_hit = true;
                            break 'road_classes;
                        }
                    }
                    dist += lot_spacing;
                }
            }
        }
    }
    if budget_hit {
        debug!("lots: budget reached at {} lots", lots.len());
    }

    // Block-infill lots: rejection-sampled backlots inside each block.
    let mut rng = DetRng::new(params.seed.wrapping_add(9999));
    'blocks: for block in &city.block_polygons {
        if reached_max(&lots) {
            break;
        }
        let area = polygon::polygon_area(&block.outer);
        let centre = polygon::average_point(&block.outer);
        let district_id = if block.district_id != 0 {
            block.district_id
        } else {
            field.sample_id(centre)
        };
        let district_type = district_type_for(&city.districts, district_id);
        let (spacing_scale, _) = district_scales(district_type);

        // Infill runs sparser than road frontage.
        let target_spacing = (base_spacing * spacing_scale * 1.5).max(min_spacing);
        let num_points = ((area / (target_spacing * target_spacing)) as usize).min(500);
        if num_points == 0 {
            continue;
        }

        let mut bb_min = Vec2::new(f64::MAX, f64::MAX);
        let mut bb_max = Vec2::new(f64::MIN, f64::MIN);
        for v in &block.outer {
            bb_min = bb_min.min(*v);
            bb_max = bb_max.max(*v);
        }

        let mut candidates: Vec<Vec2> = Vec::new();
        let attempts = num_points * 10;
        for _ in 0..attempts {
            if candidates.len() >= num_points {
                break;
            }
            let p = Vec2::new(
                rng.uniform_range(bb_min.x, bb_max.x),
                rng.uniform_range(bb_min.y, bb_max.y),
            );
            if !point_inside_block(p, block) {
                continue;
            }
            if too_close_to_existing(&lots, p, target_spacing) {
                continue;
            }
            if candidates
                .iter()
                .any(|c| p.distance_squared(*c) < target_spacing * target_spacing)
            {
                continue;
            }
            candidates.push(p);
        }

        for p in candidates {
            let (primary, _) = nearest_road(city, p);
            if !primary.valid {
                continue;
            }
            // Backlots: quieter, less exposed, more private.
            let mut scores = compute_scores(primary.road_type, primary.road_type, false);
            scores.a *= 0.5;
            scores.e *= 0.4;
            scores.p = (scores.p * 1.5).min(1.0);

            let (mut lot_type, _) = classify_lot(
                primary.road_type,
                primary.road_type,
                false,
                district_type,
            );
            if lot_type == LotType::BufferStrip && scores.p > 0.5 {
                lot_type = LotType::Residential;
            }
            lots.push(LotToken {
                id: ids.next(),
                district_id,
                centroid: p,
                primary_road: primary.road_type,
                secondary_road: primary.road_type,
                access: scores.a,
                exposure: scores.e,
                serviceability: scores.s,
                privacy: scores.p,
                lot_type,
                is_user_placed: false,
                locked_type: false,
            });
            if reached_max(&lots) {
                break 'blocks;
            }
        }
    }

    // Intersection lots at road-graph nodes with three or more arms.
    let mut all_roads: Vec<Vec<Vec2>> = Vec::new();
    for ty in RoadType::GENERATED_ORDER {
        for road in &city.segment_roads_by_type[ty.index()] {
            all_roads.push(road.points.to_vec());
        }
    }
    for road in &user_inputs.roads {
        if road.points.len() >= 2 {
            all_roads.push(road.points.clone());
        }
    }
    if all_roads.is_empty() {
        for ty in RoadType::GENERATED_ORDER {
            for road in &city.roads_by_type[ty.index()] {
                all_roads.push(road.points.clone());
            }
        }
    }

    if !all_roads.is_empty() {
        let graph = Graph::new(&all_roads, 20.0, true);
        let intersection_radius = (base_spacing * 0.25).max(10.0);
        for node in &graph.nodes {
            if node.adj.len() < 3 {
                continue;
            }
            if reached_max(&lots) {
                break;
            }

            let mut ring: Vec<Vec2> = Vec::new();
            for &adj in &node.adj {
                let dir = graph.nodes[adj].value - node.value;
                if dir.length_squared() < 1e-9 {
                    continue;
                }
                ring.push(node.value + dir.normalize() * intersection_radius);
            }
            if ring.len() < 3 {
                continue;
            }
            let centre = node.value;
            ring.sort_by(|a, b| {
                let ang_a = (a.y - centre.y).atan2(a.x - centre.x);
                let ang_b = (b.y - centre.y).atan2(b.x - centre.x);
                ang_a.total_cmp(&ang_b)
            });
            if polygon::polygon_area(&ring) < 60.0 {
                continue;
            }

            let centroid = polygon::average_point(&ring);
            if !city.bounds.contains(centroid)
                || too_close_to_existing(&lots, centroid, intersection_radius * 0.6)
            {
                continue;
            }

            let (primary, secondary) = nearest_road(city, centroid);
            if !primary.valid {
                continue;
            }
            let has_secondary = secondary.valid && secondary.distance <= primary.distance * 2.25;
            let secondary_type = if has_secondary {
                secondary.road_type
            } else {
                primary.road_type
            };
            let scores = compute_scores(primary.road_type, secondary_type, has_secondary);
            let district_id = field.sample_id(centroid);
            let (lot_type, _) = classify_lot(
                primary.road_type,
                secondary_type,
                has_secondary,
                district_type_for(&city.districts, district_id),
            );
            lots.push(LotToken {
                id: ids.next(),
                district_id,
                centroid,
                primary_road: primary.road_type,
                secondary_road: secondary_type,
                access: scores.a,
                exposure: scores.e,
                serviceability: scores.s,
                privacy: scores.p,
                lot_type,
                is_user_placed: false,
                locked_type: false,
            });
        }
    }

    info!("lots: done, {} lots", lots.len());
    city.lots = lots;
    ids
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BlockPolygon, Bounds, Polyline};

    #[test]
    fn frontage_profiles_stay_in_unit_range() {
        for ty in RoadType::ALL {
            let p = frontage_profile(ty);
            for v in [p.access, p.exposure, p.serviceability, p.privacy] {
                assert!((0.0..=1.0).contains(&v), "{ty:?}");
            }
        }
    }

    #[test]
    fn aesp_blend_weights_primary_heavily() {
        let s = compute_scores(RoadType::Street, RoadType::Alleyway, true);
        // A = 0.85 * 0.8 + 0.15 * 0.3
        assert!((s.a - 0.725).abs() < 1e-12);
        // S = 0.65 * 0.8 + 0.35 * 1.0
        assert!((s.s - 0.87).abs() < 1e-12);

        let solo = compute_scores(RoadType::Street, RoadType::Street, false);
        assert!((solo.a - 0.85 * 0.8).abs() < 1e-12);
    }

    #[test]
    fn highway_without_minor_secondary_is_buffer_strip() {
        let (ty, score) = classify_lot(
            RoadType::Highway,
            RoadType::Highway,
            false,
            DistrictType::Mixed,
        );
        assert_eq!(ty, LotType::BufferStrip);
        assert_eq!(score, 0.0);

        let (ty, _) = classify_lot(
            RoadType::Highway,
            RoadType::Alleyway,
            true,
            DistrictType::Mixed,
        );
        assert_eq!(ty, LotType::BufferStrip);

        // A sanctioned secondary opens the gate battle back up; in a
        // commercial district the retail bonus outbids the buffer strip.
        let (ty, _) = classify_lot(
            RoadType::Highway,
            RoadType::Arterial,
            true,
            DistrictType::Commercial,
        );
        assert_eq!(ty, LotType::RetailStrip);
    }

    #[test]
    fn quiet_streets_classify_residential() {
        let (ty, score) = classify_lot(
            RoadType::Street,
            RoadType::Lane,
            true,
            DistrictType::Residential,
        );
        assert_eq!(ty, LotType::Residential);
        assert!(score > 0.0);
    }

    #[test]
    fn industrial_gate_needs_serviceability_and_access() {
        // Arterial + alleyway: high S from the alley, high A from the
        // arterial.
        let s = compute_scores(RoadType::Arterial, RoadType::Alleyway, true);
        assert!(thresholds_pass(LotType::LogisticsIndustrial, &s));
        let (ty, _) = classify_lot(
            RoadType::Arterial,
            RoadType::Alleyway,
            true,
            DistrictType::Industrial,
        );
        assert_eq!(ty, LotType::LogisticsIndustrial);
    }

    fn lots_world() -> (CityParams, City, DistrictField) {
        let params = CityParams::default();
        let mut city = City::new(Bounds::new(Vec2::ZERO, Vec2::new(1000.0, 1000.0)));
        city.districts.push(District {
            id: 1,
            primary_axiom_id: -1,
            secondary_axiom_id: -1,
            district_type: DistrictType::Mixed,
            border: vec![
                Vec2::new(0.0, 0.0),
                Vec2::new(1000.0, 0.0),
                Vec2::new(1000.0, 1000.0),
                Vec2::new(0.0, 1000.0),
                Vec2::new(0.0, 0.0),
            ],
            orientation: Vec2::X,
        });
        let field = DistrictField {
            width: 1,
            height: 1,
            origin: Vec2::ZERO,
            cell_size: Vec2::new(1000.0, 1000.0),
            district_ids: vec![1],
        };
        (params, city, field)
    }

    #[test]
    fn user_lots_install_first_with_locked_types() {
        let (params, mut city, field) = lots_world();
        let user = UserPlacedInputs {
            lots: vec![crate::model::UserLotInput {
                position: Vec2::new(500.0, 500.0),
                lot_type: LotType::LuxuryScenic,
                locked_type: true,
            }],
            ..UserPlacedInputs::default()
        };
        generate(&params, &field, &mut city, &user);

        assert!(!city.lots.is_empty());
        let first = &city.lots[0];
        assert_eq!(first.id, 1);
        assert_eq!(first.lot_type, LotType::LuxuryScenic);
        assert!(first.is_user_placed);
        assert!(first.locked_type);
        assert_eq!(first.district_id, 1);
    }

    #[test]
    fn road_frontage_emits_lots_on_both_sides() {
        let (params, mut city, field) = lots_world();
        city.roads_by_type[RoadType::Street.index()].push(Polyline::new(vec![
            Vec2::new(100.0, 500.0),
            Vec2::new(900.0, 500.0),
        ]));
        generate(&params, &field, &mut city, &UserPlacedInputs::default());

        assert!(!city.lots.is_empty());
        let above = city.lots.iter().filter(|l| l.centroid.y > 500.0).count();
        let below = city.lots.iter().filter(|l| l.centroid.y < 500.0).count();
        assert!(above > 0 && below > 0);
        for lot in &city.lots {
            assert!(city.bounds.contains(lot.centroid));
            assert_eq!(lot.district_id, 1);
        }
    }

    #[test]
    fn lot_budget_is_half_the_road_budget() {
        let (mut params, mut city, field) = lots_world();
        params.max_total_roads = 8;
        for i in 0..20 {
            city.roads_by_type[RoadType::Street.index()].push(Polyline::new(vec![
                Vec2::new(10.0, 40.0 * i as f64 + 20.0),
                Vec2::new(990.0, 40.0 * i as f64 + 20.0),
            ]));
        }
        generate(&params, &field, &mut city, &UserPlacedInputs::default());
        assert!(city.lots.len() <= 4);
    }

    #[test]
    fn block_infill_adds_backlot_character() {
        let (mut params, mut city, field) = lots_world();
        // No frontage roads; a block far from the single road.
        params.max_total_roads = 0;
        city.segment_roads_by_type[RoadType::Street.index()].push(crate::model::Road {
            points: smallvec::SmallVec::from_slice(&[
                Vec2::new(0.0, 0.0),
                Vec2::new(1000.0, 0.0),
            ]),
            road_type: RoadType::Street,
            id: 1,
            is_user_created: false,
        });
        city.block_polygons.push(BlockPolygon {
            outer: vec![
                Vec2::new(200.0, 600.0),
                Vec2::new(800.0, 600.0),
                Vec2::new(800.0, 900.0),
                Vec2::new(200.0, 900.0),
                Vec2::new(200.0, 600.0),
            ],
            holes: Vec::new(),
            district_id: 1,
        });
        generate(&params, &field, &mut city, &UserPlacedInputs::default());

        let infill: Vec<_> = city
            .lots
            .iter()
            .filter(|l| l.centroid.y >= 600.0 && l.centroid.y <= 900.0)
            .collect();
        assert!(!infill.is_empty());
        for lot in infill {
            // Backlots keep privacy high relative to exposure.
            assert!(lot.privacy >= lot.exposure);
        }
    }

    #[test]
    fn intersection_lots_appear_at_three_way_junctions() {
        let (mut params, mut city, field) = lots_world();
        params.max_total_roads = 0;
        // A square loop with a bar across the middle: the two T-nodes
        // survive dangling removal with three arms each.
        let corners = [
            Vec2::new(100.0, 100.0),
            Vec2::new(900.0, 100.0),
            Vec2::new(900.0, 900.0),
            Vec2::new(100.0, 900.0),
        ];
        let mut push = |a: Vec2, b: Vec2, id: u32| {
            city.segment_roads_by_type[RoadType::Street.index()].push(crate::model::Road {
                points: smallvec::SmallVec::from_slice(&[a, b]),
                road_type: RoadType::Street,
                id,
                is_user_created: false,
            });
        };
        for i in 0..4 {
            push(corners[i], corners[(i + 1) % 4], i as u32 + 1);
        }
        push(Vec2::new(100.0, 500.0), Vec2::new(900.0, 500.0), 5);

        generate(&params, &field, &mut city, &UserPlacedInputs::default());
        let junctions = [Vec2::new(100.0, 500.0), Vec2::new(900.0, 500.0)];
        let found = city.lots.iter().any(|l| {
            junctions.iter().any(|j| l.centroid.distance(*j) < 60.0)
        });
        assert!(found, "expected an intersection lot near a T-junction");
    }
}
