//! Rank technicians for a work order.
//!
//! Scoring: specialization match against the equipment type (exact 1.0,
//! partial 0.5, none 0.0), then lowest workload, then highest rating, then
//! technician id for determinism.

use std::cmp::Ordering;

use crate::types::Technician;

#[derive(Debug, Clone, PartialEq)]
pub struct RankedTechnician {
  pub technician: Technician,
  pub score: f64,
  pub evidence: Vec<String>,
}

/// Lowercase, trim, and drop a plural "s" so "pumps" matches "PUMP".
fn stem(s: &str) -> String {
  let lower = s.trim().to_ascii_lowercase();
  match lower.strip_suffix('s') {
    Some(stripped) if stripped.len() > 2 => stripped.to_string(),
    _ => lower,
  }
}

/// How well one specialization covers an equipment type.
pub fn specialization_score(specialization: &str, equipment_type: &str) -> f64 {
  let spec = stem(specialization);
  let equipment = stem(equipment_type);
  if spec.is_empty() || equipment.is_empty() {
    return 0.0;
  }
  if spec == equipment {
    1.0
  } else if spec.contains(&equipment) || equipment.contains(&spec) {
    0.5
  } else {
    0.0
  }
}

/// Rank available technicians, best first.
pub fn rank_technicians(candidates: &[Technician], equipment_type: &str) -> Vec<RankedTechnician> {
  let mut ranked: Vec<RankedTechnician> = candidates
    .iter()
    .filter(|t| t.available)
    .map(|t| {
      let (score, matched) = t
        .specializations
        .iter()
        .map(|s| (specialization_score(s, equipment_type), s))
        .fold((0.0_f64, None), |best, (score, s)| {
          if score > best.0 {
            (score, Some(s))
          } else {
            best
          }
        });

      let mut evidence = Vec::new();
      if let Some(s) = matched {
        evidence.push(format!("specialization '{}' matches {}", s, equipment_type));
      }
      evidence.push(format!("workload {}", t.workload));
      evidence.push(format!("rating {:.1}", t.rating));

      RankedTechnician {
        technician: t.clone(),
        score,
        evidence,
      }
    })
    .collect();

  ranked.sort_by(|a, b| {
    b.score
      .partial_cmp(&a.score)
      .unwrap_or(Ordering::Equal)
      .then_with(|| a.technician.workload.cmp(&b.technician.workload))
      .then_with(|| {
        b.technician
          .rating
          .partial_cmp(&a.technician.rating)
          .unwrap_or(Ordering::Equal)
      })
      .then_with(|| a.technician.id.cmp(&b.technician.id))
  });
  ranked
}

#[cfg(test)]
mod tests {
  use super::*;

  fn tech(id: &str, specs: &[&str], workload: u32, rating: f64) -> Technician {
    Technician {
      id: id.into(),
      name: id.into(),
      specializations: specs.iter().map(|s| s.to_string()).collect(),
      available: true,
      workload,
      rating,
    }
  }

  #[test]
  fn stem_handles_plurals_and_case() {
    assert_eq!(specialization_score("pumps", "PUMP"), 1.0);
    assert_eq!(specialization_score("hydraulics", "hydraulic pump"), 0.5);
    assert_eq!(specialization_score("robotics", "conveyor"), 0.0);
  }

  #[test]
  fn best_specialization_wins() {
    let ranked = rank_technicians(
      &[
        tech("tech-003", &["compressors"], 0, 4.6),
        tech("tech-001", &["pumps", "hydraulics"], 2, 4.8),
      ],
      "pump",
    );
    assert_eq!(ranked[0].technician.id, "tech-001");
    assert_eq!(ranked[0].score, 1.0);
    assert!(ranked[0].evidence[0].contains("pumps"));
  }

  #[test]
  fn ties_break_on_workload_then_rating_then_id() {
    let ranked = rank_technicians(
      &[
        tech("tech-b", &["motors"], 1, 4.9),
        tech("tech-a", &["motors"], 0, 4.1),
        tech("tech-c", &["motors"], 0, 4.7),
        tech("tech-d", &["motors"], 0, 4.7),
      ],
      "motor",
    );
    let order: Vec<&str> = ranked.iter().map(|r| r.technician.id.as_str()).collect();
    assert_eq!(order, vec!["tech-c", "tech-d", "tech-a", "tech-b"]);
  }

  #[test]
  fn unavailable_technicians_are_excluded() {
    let mut busy = tech("tech-002", &["pumps"], 0, 5.0);
    busy.available = false;
    let ranked = rank_technicians(&[busy], "pump");
    assert!(ranked.is_empty());
  }
}
