//! JSON export, schema version 2.
//!
//! A single-file dump of the generated city for downstream rendering and
//! building-placement tools. Block rings are linted before writing:
//! non-finite points and consecutive duplicates are dropped and rings
//! recosed; rings with fewer than 4 points are omitted.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::model::{City, LotToken, RoadType, Vec2};

const SCHEMA_VERSION: u32 = 2;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct BoundsJson {
    pub min: Vec2,
    pub max: Vec2,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum CoordsJson {
    Ring(Vec<Vec2>),
    Rings(Vec<Vec<Vec2>>),
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct FeatureJson {
    pub feature_id: String,
    pub object_id: String,
    pub geom_type: String,
    pub coords: CoordsJson,
    pub meta: serde_json::Map<String, serde_json::Value>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PolylineJson {
    pub points: Vec<Vec2>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RoadSegmentJson {
    pub id: u32,
    pub points: Vec<Vec2>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct DistrictJson {
    pub id: u32,
    pub name: String,
    pub primary_axiom_id: i32,
    pub secondary_axiom_id: i32,
    #[serde(rename = "type")]
    pub district_type: String,
    pub orientation: Vec2,
    pub border: Vec<Vec2>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct NearestRoadJson {
    pub road_type: String,
    pub road_id: u32,
    pub endpoint_index: i32,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct LotTokenJson {
    pub id: u32,
    pub district_id: u32,
    pub district_name: String,
    pub centroid: Vec2,
    pub lot_type: String,
    pub primary_road: String,
    pub secondary_road: String,
    pub access: f64,
    pub exposure: f64,
    pub serviceability: f64,
    pub privacy: f64,
    pub building_key: String,
    pub nearest_major: Option<NearestRoadJson>,
    pub nearest_minor: Option<NearestRoadJson>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct BuildingSiteJson {
    pub id: u32,
    pub lot_id: u32,
    pub district_id: u32,
    pub position: Vec2,
    #[serde(rename = "type")]
    pub building_type: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CityJson {
    pub version: u32,
    pub bounds: BoundsJson,
    pub features: Vec<FeatureJson>,
    pub water: Vec<PolylineJson>,
    pub roads_by_type: BTreeMap<String, Vec<PolylineJson>>,
    pub road_segments_by_type: BTreeMap<String, Vec<RoadSegmentJson>>,
    pub districts: Vec<DistrictJson>,
    pub lots: Vec<LotTokenJson>,
    pub building_sites: Vec<BuildingSiteJson>,
}

/// Drop non-finite and consecutively duplicate points, then re-close the
/// ring. Returns fewer than 4 points for degenerate input.
pub fn lint_ring_points(points: &[Vec2]) -> Vec<Vec2> {
    let nearly_equal = |a: Vec2, b: Vec2| a.distance_squared(b) < 1e-10;
    let mut out: Vec<Vec2> = Vec::with_capacity(points.len() + 1);
    for &p in points {
        if !p.x.is_finite() || !p.y.is_finite() {
            continue;
        }
        if let Some(&last) = out.last() {
            if nearly_equal(last, p) {
                continue;
            }
        }
        out.push(p);
    }
    if out.len() >= 2 && nearly_equal(out[0], out[out.len() - 1]) {
        out.pop();
    }
    if out.len() >= 3 {
        out.push(out[0]);
    }
    out
}

fn district_name(primary: i32, secondary: i32) -> String {
    if secondary >= 0 {
        format!("A{primary}+A{secondary}")
    } else {
        format!("A{primary}")
    }
}

fn mix(seed: u64, value: u64) -> u64 {
    seed ^ value
        .wrapping_add(0x9E37_79B9_7F4A_7C15)
        .wrapping_add(seed << 6)
        .wrapping_add(seed >> 2)
}

/// 4-character base-36 key mixed from the lot's identity.
fn building_key(district_id: u32, lot_id: u32, idx: u32) -> String {
    const DIGITS: &[u8; 36] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";
    let mut h = 0u64;
    h = mix(h, district_id as u64);
    h = mix(h, lot_id as u64);
    h = mix(h, idx as u64);
    let mut out = [b'0'; 4];
    for slot in out.iter_mut().rev() {
        *slot = DIGITS[(h % 36) as usize];
        h /= 36;
    }
    String::from_utf8_lossy(&out).into_owned()
}

struct NearestRoad {
    road_type: RoadType,
    road_id: u32,
    endpoint_index: i32,
    distance: f64,
}

fn find_nearest_road(city: &City, pos: Vec2, want_major: bool) -> Option<NearestRoad> {
    let mut best: Option<NearestRoad> = None;
    for ty in RoadType::GENERATED_ORDER {
        if ty.is_major_group() != want_major {
            continue;
        }
        for road in &city.segment_roads_by_type[ty.index()] {
            if road.points.len() < 2 {
                continue;
            }
            let mut best_dist = f64::MAX;
            for w in road.points.windows(2) {
                best_dist = best_dist.min(crate::polygon::distance_to_segment(pos, w[0], w[1]));
            }
            if best.as_ref().map_or(true, |b| best_dist < b.distance) {
                let d0 = pos.distance(road.points[0]);
                let d1 = pos.distance(road.points[road.points.len() - 1]);
                best = Some(NearestRoad {
                    road_type: ty,
                    road_id: road.id,
                    endpoint_index: if d1 < d0 {
                        (road.points.len() - 1) as i32
                    } else {
                        0
                    },
                    distance: best_dist,
                });
            }
        }
    }
    best
}

fn lot_to_json(city: &City, lot: &LotToken) -> LotTokenJson {
    let district_name = if lot.district_id > 0 && lot.district_id as usize <= city.districts.len()
    {
        let d = &city.districts[(lot.district_id - 1) as usize];
        self::district_name(d.primary_axiom_id, d.secondary_axiom_id)
    } else {
        "-".to_string()
    };
    let to_json = |n: NearestRoad| NearestRoadJson {
        road_type: n.road_type.key().to_string(),
        road_id: n.road_id,
        endpoint_index: n.endpoint_index,
    };
    LotTokenJson {
        id: lot.id,
        district_id: lot.district_id,
        district_name,
        centroid: lot.centroid,
        lot_type: lot.lot_type.key().to_string(),
        primary_road: lot.primary_road.key().to_string(),
        secondary_road: lot.secondary_road.key().to_string(),
        access: lot.access,
        exposure: lot.exposure,
        serviceability: lot.serviceability,
        privacy: lot.privacy,
        building_key: building_key(lot.district_id, lot.id, 0),
        nearest_major: find_nearest_road(city, lot.centroid, true).map(to_json),
        nearest_minor: find_nearest_road(city, lot.centroid, false).map(to_json),
    }
}

/// Build the schema-v2 document for `city`.
pub fn city_to_json(city: &City) -> CityJson {
    // Zone features from block polygons, or district borders when no
    // block survived.
    let mut export_rings: Vec<Vec<Vec<Vec2>>> = Vec::new();
    for poly in &city.block_polygons {
        let outer = lint_ring_points(&poly.outer);
        if outer.len() < 4 {
            continue;
        }
        let mut rings = vec![outer];
        for hole in &poly.holes {
            let hole_ring = lint_ring_points(hole);
            if hole_ring.len() >= 4 {
                rings.push(hole_ring);
            }
        }
        export_rings.push(rings);
    }
    if export_rings.is_empty() {
        for district in &city.districts {
            let ring = lint_ring_points(&district.border);
            if ring.len() >= 4 {
                export_rings.push(vec![ring]);
            }
        }
    }

    let features = export_rings
        .into_iter()
        .enumerate()
        .map(|(i, mut rings)| FeatureJson {
            feature_id: "zones".to_string(),
            object_id: format!("block_{i}"),
            geom_type: "POLYGON".to_string(),
            coords: if rings.len() == 1 {
                CoordsJson::Ring(rings.remove(0))
            } else {
                CoordsJson::Rings(rings)
            },
            meta: serde_json::Map::new(),
        })
        .collect();

    let mut roads_by_type = BTreeMap::new();
    let mut road_segments_by_type = BTreeMap::new();
    for ty in RoadType::ALL {
        roads_by_type.insert(
            ty.key().to_string(),
            city.roads_by_type[ty.index()]
                .iter()
                .map(|p| PolylineJson {
                    points: p.points.clone(),
                })
                .collect(),
        );
        road_segments_by_type.insert(
            ty.key().to_string(),
            city.segment_roads_by_type[ty.index()]
                .iter()
                .map(|r| RoadSegmentJson {
                    id: r.id,
                    points: r.points.to_vec(),
                })
                .collect(),
        );
    }

    CityJson {
        version: SCHEMA_VERSION,
        bounds: BoundsJson {
            min: city.bounds.min,
            max: city.bounds.max,
        },
        features,
        water: city
            .water
            .iter()
            .map(|p| PolylineJson {
                points: p.points.clone(),
            })
            .collect(),
        roads_by_type,
        road_segments_by_type,
        districts: city
            .districts
            .iter()
            .map(|d| DistrictJson {
                id: d.id,
                name: district_name(d.primary_axiom_id, d.secondary_axiom_id),
                primary_axiom_id: d.primary_axiom_id,
                secondary_axiom_id: d.secondary_axiom_id,
                district_type: d.district_type.key().to_string(),
                orientation: d.orientation,
                border: d.border.clone(),
            })
            .collect(),
        lots: city.lots.iter().map(|l| lot_to_json(city, l)).collect(),
        building_sites: city
            .building_sites
            .iter()
            .map(|s| BuildingSiteJson {
                id: s.id,
                lot_id: s.lot_id,
                district_id: s.district_id,
                position: s.position,
                building_type: s.building_type.key().to_string(),
            })
            .collect(),
    }
}

/// Write the export to `path`, creating parent directories.
pub fn export_city_to_json(city: &City, path: &Path) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let file = fs::File::create(path)?;
    serde_json::to_writer(io::BufWriter::new(file), &city_to_json(city))
        .map_err(io::Error::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        BlockPolygon, Bounds, BuildingSite, BuildingType, District, DistrictType, LotType,
        Polyline, Road,
    };
    use smallvec::SmallVec;

    fn sample_city() -> City {
        let mut city = City::new(Bounds::new(Vec2::ZERO, Vec2::new(1000.0, 1000.0)));
        city.water.push(Polyline::new(vec![
            Vec2::new(0.0, 900.0),
            Vec2::new(1000.0, 950.0),
        ]));
        city.roads_by_type[RoadType::Avenue.index()].push(Polyline::new(vec![
            Vec2::new(0.0, 500.0),
            Vec2::new(1000.0, 500.0),
        ]));
        city.segment_roads_by_type[RoadType::Avenue.index()].push(Road {
            points: SmallVec::from_slice(&[Vec2::new(0.0, 500.0), Vec2::new(1000.0, 500.0)]),
            road_type: RoadType::Avenue,
            id: 1,
            is_user_created: false,
        });
        city.segment_roads_by_type[RoadType::Lane.index()].push(Road {
            points: SmallVec::from_slice(&[Vec2::new(480.0, 400.0), Vec2::new(480.0, 600.0)]),
            road_type: RoadType::Lane,
            id: 2,
            is_user_created: false,
        });
        city.districts.push(District {
            id: 1,
            primary_axiom_id: 0,
            secondary_axiom_id: 2,
            district_type: DistrictType::Commercial,
            border: vec![
                Vec2::new(0.0, 0.0),
                Vec2::new(1000.0, 0.0),
                Vec2::new(1000.0, 1000.0),
                Vec2::new(0.0, 1000.0),
                Vec2::new(0.0, 0.0),
            ],
            orientation: Vec2::X,
        });
        city.lots.push(LotToken {
            id: 1,
            district_id: 1,
            centroid: Vec2::new(500.0, 480.0),
            primary_road: RoadType::Avenue,
            secondary_road: RoadType::Lane,
            access: 0.75,
            exposure: 0.74,
            serviceability: 0.695,
            privacy: 0.6,
            lot_type: LotType::MixedUse,
            is_user_placed: false,
            locked_type: false,
        });
        city.building_sites.push(BuildingSite {
            id: 1,
            lot_id: 1,
            district_id: 1,
            position: Vec2::new(502.0, 470.0),
            building_type: BuildingType::MixedUse,
            is_user_placed: false,
            locked_type: false,
        });
        city.block_polygons.push(BlockPolygon {
            outer: vec![
                Vec2::new(100.0, 100.0),
                Vec2::new(900.0, 100.0),
                Vec2::new(900.0, 400.0),
                Vec2::new(100.0, 400.0),
                Vec2::new(100.0, 100.0),
            ],
            holes: Vec::new(),
            district_id: 1,
        });
        city
    }

    #[test]
    fn export_round_trips_through_serde() {
        let city = sample_city();
        let doc = city_to_json(&city);
        let text = serde_json::to_string(&doc).expect("serialize");
        let parsed: CityJson = serde_json::from_str(&text).expect("parse");
        assert_eq!(doc, parsed);
        assert_eq!(parsed.version, 2);
        assert_eq!(parsed.bounds.max, Vec2::new(1000.0, 1000.0));
        // Every road key is present, even for empty classes.
        assert_eq!(parsed.roads_by_type.len(), RoadType::COUNT);
        assert_eq!(parsed.road_segments_by_type.len(), RoadType::COUNT);
        assert_eq!(parsed.road_segments_by_type["avenue"][0].id, 1);
    }

    #[test]
    fn lot_json_carries_names_keys_and_nearest_roads() {
        let city = sample_city();
        let doc = city_to_json(&city);
        let lot = &doc.lots[0];
        assert_eq!(lot.district_name, "A0+A2");
        assert_eq!(lot.lot_type, "mixed_use");
        assert_eq!(lot.building_key.len(), 4);
        assert_eq!(lot.building_key, building_key(1, 1, 0));

        let major = lot.nearest_major.as_ref().expect("nearest major");
        assert_eq!(major.road_type, "avenue");
        assert_eq!(major.road_id, 1);
        let minor = lot.nearest_minor.as_ref().expect("nearest minor");
        assert_eq!(minor.road_type, "lane");
        assert_eq!(minor.road_id, 2);
    }

    #[test]
    fn ring_linting_is_idempotent() {
        let ring = vec![
            Vec2::new(0.0, 0.0),
            Vec2::new(0.0, 0.0),
            Vec2::new(10.0, 0.0),
            Vec2::new(f64::NAN, 5.0),
            Vec2::new(10.0, 10.0),
            Vec2::new(0.0, 10.0),
            Vec2::new(0.0, 0.0),
        ];
        let once = lint_ring_points(&ring);
        let twice = lint_ring_points(&once);
        assert_eq!(once, twice);
        assert_eq!(once.first(), once.last());
        assert_eq!(once.len(), 5);
    }

    #[test]
    fn degenerate_rings_are_omitted_from_features() {
        let mut city = sample_city();
        city.block_polygons[0].outer = vec![Vec2::new(0.0, 0.0), Vec2::new(1.0, 0.0)];
        let doc = city_to_json(&city);
        // Falls back to district borders.
        assert_eq!(doc.features.len(), 1);
        match &doc.features[0].coords {
            CoordsJson::Ring(ring) => assert_eq!(ring.len(), 5),
            CoordsJson::Rings(_) => panic!("expected a single ring"),
        }
    }

    #[test]
    fn export_writes_file_with_parent_dirs() {
        let city = sample_city();
        let dir = std::env::temp_dir().join("citygen_export_test");
        let _ = fs::remove_dir_all(&dir);
        let path = dir.join("nested").join("city.json");
        export_city_to_json(&city, &path).expect("export");
        let text = fs::read_to_string(&path).expect("read back");
        let parsed: CityJson = serde_json::from_str(&text).expect("parse");
        assert_eq!(parsed.version, 2);
        let _ = fs::remove_dir_all(&dir);
    }
}
