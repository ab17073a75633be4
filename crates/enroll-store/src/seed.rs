use tracing::info;

use enroll_core::{AgeCategory, NewCompetition, COMPETITION_TYPES};

use crate::competitions::CompetitionRepo;
use crate::error::StoreError;

/// Create one competition for every (type, age category) pair that does not
/// exist yet. Returns how many were created.
pub fn seed_competitions(repo: &CompetitionRepo) -> Result<usize, StoreError> {
    let mut created = 0;
    for kind in COMPETITION_TYPES {
        for category in AgeCategory::ALL {
            if !repo.get_by_type_and_age(kind, category)?.is_empty() {
                continue;
            }
            repo.add(&NewCompetition {
                competition_type: kind.to_string(),
                age_category: category,
            })?;
            created += 1;
        }
    }
    info!(created, "competitions seeded");
    Ok(created)
}
