//! Mission rule definitions.
//!
//! A catalog is loaded once (built in or from JSON), validated, and shared
//! read-only for the lifetime of the process.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::macros::date;
use time::Date;

use crate::record::date_serde;
use crate::MissionError;

/// Member count at which the standard meditation-share mission scores.
pub const MEDITATION_SHARE_THRESHOLD: usize = 6;

/// How a mission's count turns into points when no threshold applies.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Tally {
    /// `points × count`.
    PerUnit,
    /// `points` once if the count is non-zero.
    OncePerDay,
}

/// What one day contributes toward a monthly cap.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CapUnit {
    /// A day with any activity counts once, however many members are listed.
    DistinctDays,
    /// A day counts its raw tally (list length or stored count).
    Count,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
pub struct MonthlyCap {
    pub limit: u32,
    pub unit: CapUnit,
}

/// Independent rule modifiers, applied by the score calculator in a fixed
/// order: eligibility window, count source, threshold, tally.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Modifier {
    EligibilityWindow {
        #[serde(with = "date_serde")]
        date: Date,
    },
    MemberList,
    Threshold {
        min_members: usize,
    },
    MonthlyCap {
        limit: u32,
        unit: CapUnit,
    },
}

impl Modifier {
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::EligibilityWindow { .. } => "eligibility_window",
            Self::MemberList => "member_list",
            Self::Threshold { .. } => "threshold",
            Self::MonthlyCap { .. } => "monthly_cap",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct Mission {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub points: u32,
    pub unit: String,
    pub tally: Tally,
    #[serde(default)]
    pub modifiers: Vec<Modifier>,
}

impl Mission {
    #[must_use]
    pub fn allowed_date(&self) -> Option<Date> {
        self.modifiers.iter().find_map(|modifier| match modifier {
            Modifier::EligibilityWindow { date } => Some(*date),
            _ => None,
        })
    }

    /// Whether the mission scores at all on `date`.
    #[must_use]
    pub fn eligible_on(&self, date: Date) -> bool {
        match self.allowed_date() {
            Some(allowed) => allowed == date,
            None => true,
        }
    }

    #[must_use]
    pub fn uses_member_list(&self) -> bool {
        self.modifiers
            .iter()
            .any(|modifier| matches!(modifier, Modifier::MemberList))
    }

    #[must_use]
    pub fn threshold(&self) -> Option<usize> {
        self.modifiers.iter().find_map(|modifier| match modifier {
            Modifier::Threshold { min_members } => Some(*min_members),
            _ => None,
        })
    }

    #[must_use]
    pub fn monthly_cap(&self) -> Option<MonthlyCap> {
        self.modifiers.iter().find_map(|modifier| match modifier {
            Modifier::MonthlyCap { limit, unit } => Some(MonthlyCap {
                limit: *limit,
                unit: *unit,
            }),
            _ => None,
        })
    }

    fn validate(&self) -> Result<(), MissionError> {
        if self.id.trim().is_empty() {
            return Err(MissionError::Configuration(
                "mission id MUST be non-empty".to_string(),
            ));
        }

        if self.points == 0 {
            return Err(MissionError::Configuration(format!(
                "mission {} points MUST be >= 1",
                self.id
            )));
        }

        let mut kinds = BTreeSet::new();
        for modifier in &self.modifiers {
            if !kinds.insert(modifier.kind()) {
                return Err(MissionError::Configuration(format!(
                    "mission {} declares modifier {} more than once",
                    self.id,
                    modifier.kind()
                )));
            }

            match modifier {
                Modifier::Threshold { min_members: 0 } => {
                    return Err(MissionError::Configuration(format!(
                        "mission {} threshold min_members MUST be >= 1",
                        self.id
                    )));
                }
                Modifier::MonthlyCap { limit: 0, .. } => {
                    return Err(MissionError::Configuration(format!(
                        "mission {} monthly_cap limit MUST be >= 1",
                        self.id
                    )));
                }
                _ => {}
            }
        }

        if self.threshold().is_some() && !self.uses_member_list() {
            return Err(MissionError::Configuration(format!(
                "mission {} threshold requires a member_list modifier",
                self.id
            )));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct Department {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Deserialize)]
struct CatalogDocument {
    missions: Vec<Mission>,
    departments: Vec<Department>,
}

/// Ordered, validated mission and department definitions.
///
/// Order only drives display and breakdown ordering; scoring does not depend
/// on it.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct MissionCatalog {
    missions: Vec<Mission>,
    departments: Vec<Department>,
}

impl MissionCatalog {
    /// Builds a catalog from definitions.
    ///
    /// # Errors
    /// Returns [`MissionError::Configuration`] when the definitions break a
    /// catalog invariant.
    pub fn new(missions: Vec<Mission>, departments: Vec<Department>) -> Result<Self, MissionError> {
        let catalog = Self {
            missions,
            departments,
        };
        catalog.validate()?;
        Ok(catalog)
    }

    /// Decodes and validates a catalog document.
    ///
    /// # Errors
    /// Returns [`MissionError::Configuration`] when JSON decoding fails or the
    /// decoded catalog is invalid.
    pub fn from_json(value: &Value) -> Result<Self, MissionError> {
        let document: CatalogDocument = serde_json::from_value(value.clone()).map_err(|err| {
            MissionError::Configuration(format!("invalid catalog JSON payload: {err}"))
        })?;
        Self::new(document.missions, document.departments)
    }

    /// Built-in catalog: ten missions and the `sarang`/`hana` departments.
    #[must_use]
    pub fn standard() -> Self {
        let missions = vec![
            member_mission("evangelism", "전도", "말씀 듣는 사진 촬영", 5, "1인", vec![]),
            member_mission(
                "department-visit",
                "부서 심방",
                "심방 사진 촬영 (월 2회 제한)",
                5,
                "1인",
                vec![Modifier::MonthlyCap {
                    limit: 2,
                    unit: CapUnit::DistinctDays,
                }],
            ),
            counted_mission("testimony", "간증 자원", "청년회 교제 시 자원"),
            Mission {
                id: "meditation-share".to_string(),
                name: "말씀 묵상 공유".to_string(),
                description: "부서별 일일 6명 이상 공유".to_string(),
                points: 1,
                unit: "1일".to_string(),
                tally: Tally::OncePerDay,
                modifiers: vec![
                    Modifier::MemberList,
                    Modifier::Threshold {
                        min_members: MEDITATION_SHARE_THRESHOLD,
                    },
                ],
            },
            counted_mission(
                "sunday-meditation",
                "주일 묵상모임",
                "교제 참석 (중고등부 교사 오후 교제 인도 시 교제 사진 촬영)",
            ),
            counted_mission(
                "zoom-meditation",
                "줌 묵상모임",
                "모임 후 사진 촬영 - 구역모임 참석 시 사진 인증",
            ),
            counted_mission("wednesday-sermon", "수요말씀 참석", "말씀 후 사진 촬영"),
            counted_mission("youth-fellowship", "청년회 교제", "18:50 사진 촬영"),
            counted_mission("service", "집회 참석", "말씀 후 사진 촬영"),
            member_mission(
                "winter-attendance",
                "동계 참석",
                "단체 사진 촬영",
                1,
                "1인",
                vec![Modifier::EligibilityWindow {
                    date: date!(2026 - 01 - 25),
                }],
            ),
        ];

        let departments = vec![
            Department {
                id: "sarang".to_string(),
                name: "사랑부".to_string(),
            },
            Department {
                id: "hana".to_string(),
                name: "하나부".to_string(),
            },
        ];

        Self {
            missions,
            departments,
        }
    }

    /// Validates mission and department definitions.
    ///
    /// # Errors
    /// Returns [`MissionError::Configuration`] for the first violated rule.
    pub fn validate(&self) -> Result<(), MissionError> {
        if self.missions.is_empty() {
            return Err(MissionError::Configuration(
                "catalog MUST define at least one mission".to_string(),
            ));
        }

        let mut ids = BTreeSet::new();
        for mission in &self.missions {
            mission.validate()?;
            if !ids.insert(mission.id.as_str()) {
                return Err(MissionError::Configuration(format!(
                    "duplicate mission id {}",
                    mission.id
                )));
            }
        }

        if self.departments.len() < 2 {
            return Err(MissionError::Configuration(
                "catalog MUST define at least two departments".to_string(),
            ));
        }

        let mut department_ids = BTreeSet::new();
        for department in &self.departments {
            if department.id.trim().is_empty() {
                return Err(MissionError::Configuration(
                    "department id MUST be non-empty".to_string(),
                ));
            }
            if !department_ids.insert(department.id.as_str()) {
                return Err(MissionError::Configuration(format!(
                    "duplicate department id {}",
                    department.id
                )));
            }
        }

        Ok(())
    }

    #[must_use]
    pub fn missions(&self) -> &[Mission] {
        &self.missions
    }

    #[must_use]
    pub fn mission(&self, id: &str) -> Option<&Mission> {
        self.missions.iter().find(|mission| mission.id == id)
    }

    #[must_use]
    pub fn departments(&self) -> &[Department] {
        &self.departments
    }

    #[must_use]
    pub fn department(&self, id: &str) -> Option<&Department> {
        self.departments
            .iter()
            .find(|department| department.id == id)
    }

    /// The two departments compared on the scoreboard, in display order.
    #[must_use]
    pub fn contestants(&self) -> (&Department, &Department) {
        // `validate` guarantees at least two departments.
        (&self.departments[0], &self.departments[1])
    }

    #[must_use]
    pub fn is_member_list(&self, mission_id: &str) -> bool {
        self.mission(mission_id)
            .is_some_and(Mission::uses_member_list)
    }
}

fn counted_mission(id: &str, name: &str, description: &str) -> Mission {
    Mission {
        id: id.to_string(),
        name: name.to_string(),
        description: description.to_string(),
        points: 1,
        unit: "1인".to_string(),
        tally: Tally::PerUnit,
        modifiers: Vec::new(),
    }
}

fn member_mission(
    id: &str,
    name: &str,
    description: &str,
    points: u32,
    unit: &str,
    extra: Vec<Modifier>,
) -> Mission {
    let mut modifiers = vec![Modifier::MemberList];
    modifiers.extend(extra);
    Mission {
        id: id.to_string(),
        name: name.to_string(),
        description: description.to_string(),
        points,
        unit: unit.to_string(),
        tally: Tally::PerUnit,
        modifiers,
    }
}
