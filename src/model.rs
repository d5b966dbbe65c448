//! Core city data model.
//!
//! Everything the pipeline produces lives here: road records in both
//! polyline and segment form, districts, lot tokens, building sites, and
//! the `City` aggregate that `generate_city` returns. All geometry is
//! `f64`; points are `glam::DVec2`.

use smallvec::SmallVec;

/// 2-D point type used throughout the generator.
pub type Vec2 = glam::DVec2;

/// Rotate `p` around `center` by `angle` radians.
pub fn rotate_around(p: Vec2, center: Vec2, angle: f64) -> Vec2 {
    let (sin, cos) = angle.sin_cos();
    let r = p - center;
    Vec2::new(r.x * cos - r.y * sin, r.x * sin + r.y * cos) + center
}

/// Scale `v` to the given length; zero vectors stay zero.
pub fn set_length(v: Vec2, len: f64) -> Vec2 {
    let l = v.length();
    if l > 0.0 {
        v * (len / l)
    } else {
        v
    }
}

/// Signed angle from `b` to `a` in (-pi, pi].
pub fn angle_between(a: Vec2, b: Vec2) -> f64 {
    let mut diff = a.y.atan2(a.x) - b.y.atan2(b.x);
    if diff > std::f64::consts::PI {
        diff -= 2.0 * std::f64::consts::PI;
    } else if diff <= -std::f64::consts::PI {
        diff += 2.0 * std::f64::consts::PI;
    }
    diff
}

/// Axis-aligned bounding box for the generated city.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Bounds {
    pub min: Vec2,
    pub max: Vec2,
}

impl Bounds {
    pub fn new(min: Vec2, max: Vec2) -> Self {
        Self { min, max }
    }

    pub fn extent(&self) -> Vec2 {
        self.max - self.min
    }

    pub fn contains(&self, p: Vec2) -> bool {
        p.x >= self.min.x && p.y >= self.min.y && p.x <= self.max.x && p.y <= self.max.y
    }
}

/// Road classification. The first ten variants are generated in this
/// order; `MMajor`/`MMinor` are reserved for user-authored roads.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RoadType {
    Highway,
    Arterial,
    Avenue,
    Boulevard,
    Street,
    Lane,
    Alleyway,
    CulDeSac,
    Drive,
    Driveway,
    MMajor,
    MMinor,
}

impl RoadType {
    pub const COUNT: usize = 12;

    pub const ALL: [RoadType; Self::COUNT] = [
        RoadType::Highway,
        RoadType::Arterial,
        RoadType::Avenue,
        RoadType::Boulevard,
        RoadType::Street,
        RoadType::Lane,
        RoadType::Alleyway,
        RoadType::CulDeSac,
        RoadType::Drive,
        RoadType::Driveway,
        RoadType::MMajor,
        RoadType::MMinor,
    ];

    /// Generation order for the road pipeline; user classes are excluded.
    pub const GENERATED_ORDER: [RoadType; 10] = [
        RoadType::Highway,
        RoadType::Arterial,
        RoadType::Avenue,
        RoadType::Boulevard,
        RoadType::Street,
        RoadType::Lane,
        RoadType::Alleyway,
        RoadType::CulDeSac,
        RoadType::Drive,
        RoadType::Driveway,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn bit(self) -> u32 {
        1u32 << self.index()
    }

    /// Snake-case key used by the JSON export.
    pub fn key(self) -> &'static str {
        match self {
            RoadType::Highway => "highway",
            RoadType::Arterial => "arterial",
            RoadType::Avenue => "avenue",
            RoadType::Boulevard => "boulevard",
            RoadType::Street => "street",
            RoadType::Lane => "lane",
            RoadType::Alleyway => "alleyway",
            RoadType::CulDeSac => "cul_de_sac",
            RoadType::Drive => "drive",
            RoadType::Driveway => "driveway",
            RoadType::MMajor => "m_major",
            RoadType::MMinor => "m_minor",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            RoadType::Highway => "Highway",
            RoadType::Arterial => "Arterial",
            RoadType::Avenue => "Avenue",
            RoadType::Boulevard => "Boulevard",
            RoadType::Street => "Street",
            RoadType::Lane => "Lane",
            RoadType::Alleyway => "Alleyway",
            RoadType::CulDeSac => "CulDeSac",
            RoadType::Drive => "Drive",
            RoadType::Driveway => "Driveway",
            RoadType::MMajor => "M_Major",
            RoadType::MMinor => "M_Minor",
        }
    }

    /// Highway/Arterial/Avenue/Boulevard count against the major budget.
    pub fn is_major_group(self) -> bool {
        matches!(
            self,
            RoadType::Highway | RoadType::Arterial | RoadType::Avenue | RoadType::Boulevard
        )
    }

    pub fn is_user_type(self) -> bool {
        matches!(self, RoadType::MMajor | RoadType::MMinor)
    }
}

/// Ordered list of points forming a path. Not required to be closed.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Polyline {
    pub points: Vec<Vec2>,
}

impl Polyline {
    pub fn new(points: Vec<Vec2>) -> Self {
        Self { points }
    }
}

/// Closed polygon ring used for debug block faces.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Polygon {
    pub points: Vec<Vec2>,
    pub district_id: u32,
}

/// Block polygon: outer ring plus optional interior holes.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BlockPolygon {
    pub outer: Vec<Vec2>,
    pub holes: Vec<Vec<Vec2>>,
    pub district_id: u32,
}

/// Segment-level road record. Almost every road is a 2-point segment
/// after the graph pass, hence the inline capacity.
#[derive(Clone, Debug, PartialEq)]
pub struct Road {
    pub points: SmallVec<[Vec2; 2]>,
    pub road_type: RoadType,
    pub id: u32,
    pub is_user_created: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DistrictType {
    Mixed = 0,
    Residential,
    Commercial,
    Civic,
    Industrial,
}

impl DistrictType {
    pub const COUNT: usize = 5;

    pub fn from_index(i: usize) -> DistrictType {
        match i {
            1 => DistrictType::Residential,
            2 => DistrictType::Commercial,
            3 => DistrictType::Civic,
            4 => DistrictType::Industrial,
            _ => DistrictType::Mixed,
        }
    }

    pub fn key(self) -> &'static str {
        match self {
            DistrictType::Mixed => "mixed",
            DistrictType::Residential => "residential",
            DistrictType::Commercial => "commercial",
            DistrictType::Civic => "civic",
            DistrictType::Industrial => "industrial",
        }
    }
}

/// A connected region of the plane sharing an axiom labelling.
#[derive(Clone, Debug, PartialEq)]
pub struct District {
    pub id: u32,
    /// Axiom ids; -1 means none.
    pub primary_axiom_id: i32,
    pub secondary_axiom_id: i32,
    pub district_type: DistrictType,
    /// Closed ring; falls back to the full bounds when the walk fails.
    pub border: Vec<Vec2>,
    /// Major field direction at the district centroid; zero when flat.
    pub orientation: Vec2,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LotType {
    None = 0,
    Residential,
    RowhomeCompact,
    RetailStrip,
    MixedUse,
    LogisticsIndustrial,
    CivicCultural,
    LuxuryScenic,
    BufferStrip,
}

impl LotType {
    pub fn key(self) -> &'static str {
        match self {
            LotType::None => "none",
            LotType::Residential => "residential",
            LotType::RowhomeCompact => "rowhome_compact",
            LotType::RetailStrip => "retail_strip",
            LotType::MixedUse => "mixed_use",
            LotType::LogisticsIndustrial => "logistics_industrial",
            LotType::CivicCultural => "civic_cultural",
            LotType::LuxuryScenic => "luxury_scenic",
            LotType::BufferStrip => "buffer_strip",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BuildingType {
    None = 0,
    Residential,
    Rowhome,
    Retail,
    MixedUse,
    Industrial,
    Civic,
    Luxury,
    Utility,
}

impl BuildingType {
    pub fn key(self) -> &'static str {
        match self {
            BuildingType::None => "none",
            BuildingType::Residential => "residential",
            BuildingType::Rowhome => "rowhome",
            BuildingType::Retail => "retail",
            BuildingType::MixedUse => "mixed_use",
            BuildingType::Industrial => "industrial",
            BuildingType::Civic => "civic",
            BuildingType::Luxury => "luxury",
            BuildingType::Utility => "utility",
        }
    }
}

/// A scored, typed point representing a parcel.
#[derive(Clone, Debug, PartialEq)]
pub struct LotToken {
    pub id: u32,
    pub district_id: u32,
    pub centroid: Vec2,
    pub primary_road: RoadType,
    pub secondary_road: RoadType,
    pub access: f64,
    pub exposure: f64,
    pub serviceability: f64,
    pub privacy: f64,
    pub lot_type: LotType,
    pub is_user_placed: bool,
    pub locked_type: bool,
}

impl Default for LotToken {
    fn default() -> Self {
        Self {
            id: 0,
            district_id: 0,
            centroid: Vec2::ZERO,
            primary_road: RoadType::Street,
            secondary_road: RoadType::Street,
            access: 0.0,
            exposure: 0.0,
            serviceability: 0.0,
            privacy: 0.0,
            lot_type: LotType::None,
            is_user_placed: false,
            locked_type: false,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct BuildingSite {
    pub id: u32,
    pub lot_id: u32,
    pub district_id: u32,
    pub position: Vec2,
    pub building_type: BuildingType,
    pub is_user_placed: bool,
    pub locked_type: bool,
}

/// Counters filled by the block polygonizer for diagnostics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BlockDebugStats {
    pub road_inputs: u32,
    pub segments: u32,
    pub intersections: u32,
    pub faces_found: u32,
    pub valid_blocks: u32,
    pub input_lines: u32,
    pub snapped_lines: u32,
    pub healed_lines: u32,
    pub pruned_lines: u32,
    pub invalid_polygons: u32,
    pub repaired_polygons: u32,
    pub skipped_polygons: u32,
}

/// Designer axiom shape.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AxiomType {
    Radial = 0,
    Delta,
    Block,
    GridCorrective,
}

/// Landmark archetype that biases nearby district types.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum InfluencerType {
    #[default]
    None,
    Market,
    Keep,
    Temple,
    Harbor,
    Park,
    Gate,
    Well,
}

/// Designer-placed marker driving the tensor field and districts.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AxiomInput {
    pub id: i32,
    pub axiom_type: AxiomType,
    pub pos: Vec2,
    pub radius: f64,
    pub influencer: InfluencerType,
}

/// User-placed lot input.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct UserLotInput {
    pub position: Vec2,
    pub lot_type: LotType,
    pub locked_type: bool,
}

/// User-placed building input.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct UserBuildingInput {
    pub position: Vec2,
    pub building_type: BuildingType,
    pub locked_type: bool,
}

/// User-placed road input for block extraction.
#[derive(Clone, Debug, PartialEq)]
pub struct UserRoadInput {
    pub points: Vec<Vec2>,
    pub road_type: RoadType,
    /// Generated road index this road replaces; -1 when standalone.
    pub source_generated_id: i32,
}

/// Bundle of user-placed elements fed into the generator.
#[derive(Clone, Debug, PartialEq)]
pub struct UserPlacedInputs {
    pub lots: Vec<UserLotInput>,
    pub buildings: Vec<UserBuildingInput>,
    pub roads: Vec<UserRoadInput>,
    /// If false, the generator may override user-placed types.
    pub lock_user_types: bool,
}

impl Default for UserPlacedInputs {
    fn default() -> Self {
        Self {
            lots: Vec::new(),
            buildings: Vec::new(),
            roads: Vec::new(),
            lock_user_types: true,
        }
    }
}

/// Aggregated result of the full pipeline.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct City {
    pub bounds: Bounds,
    pub water: Vec<Polyline>,
    pub roads_by_type: [Vec<Polyline>; RoadType::COUNT],
    pub segment_roads_by_type: [Vec<Road>; RoadType::COUNT],
    pub districts: Vec<District>,
    pub lots: Vec<LotToken>,
    pub building_sites: Vec<BuildingSite>,
    pub block_polygons: Vec<BlockPolygon>,
    /// Debug faces recorded by the block polygonizer.
    pub block_faces: Vec<Polygon>,
    pub block_stats: BlockDebugStats,
}

impl City {
    pub fn new(bounds: Bounds) -> Self {
        Self {
            bounds,
            ..Self::default()
        }
    }
}

/// Sequential id source. Ids are 1-based; wrapping is recorded so the
/// pipeline can surface it as a fatal error instead of emitting duplicate
/// ids.
#[derive(Clone, Copy, Debug)]
pub struct IdGen {
    next: u32,
    overflowed: bool,
}

impl IdGen {
    pub fn new() -> Self {
        Self {
            next: 1,
            overflowed: false,
        }
    }

    pub fn next(&mut self) -> u32 {
        let id = self.next;
        match self.next.checked_add(1) {
            Some(n) => self.next = n,
            None => self.overflowed = true,
        }
        id
    }

    pub fn overflowed(&self) -> bool {
        self.overflowed
    }
}

impl Default for IdGen {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn road_type_indices_are_dense() {
        for (i, ty) in RoadType::ALL.iter().enumerate() {
            assert_eq!(ty.index(), i);
            assert_eq!(ty.bit(), 1u32 << i);
        }
    }

    #[test]
    fn major_group_matches_budget_classes() {
        let majors: Vec<_> = RoadType::ALL
            .iter()
            .filter(|t| t.is_major_group())
            .collect();
        assert_eq!(
            majors,
            vec![
                &RoadType::Highway,
                &RoadType::Arterial,
                &RoadType::Avenue,
                &RoadType::Boulevard
            ]
        );
    }

    #[test]
    fn rotate_around_quarter_turn() {
        let p = rotate_around(
            Vec2::new(2.0, 1.0),
            Vec2::new(1.0, 1.0),
            std::f64::consts::FRAC_PI_2,
        );
        assert!((p - Vec2::new(1.0, 2.0)).length() < 1e-12);
    }

    #[test]
    fn id_gen_reports_overflow() {
        let mut ids = IdGen {
            next: u32::MAX,
            overflowed: false,
        };
        assert_eq!(ids.next(), u32::MAX);
        assert!(ids.overflowed());
    }
}
