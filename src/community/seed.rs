//! Startup data: the four sample reports and six community stories

use serde::Deserialize;

use super::report::Report;
use super::story::Story;
use super::CommunityError;

const SEED_JSON: &str = include_str!("seed.json");

#[derive(Deserialize)]
struct SeedDocument {
    reports: Vec<Report>,
    stories: Vec<Story>,
}

fn document() -> Result<SeedDocument, CommunityError> {
    serde_json::from_str(SEED_JSON).map_err(CommunityError::Seed)
}

pub fn reports() -> Result<Vec<Report>, CommunityError> {
    Ok(document()?.reports)
}

pub fn stories() -> Result<Vec<Story>, CommunityError> {
    Ok(document()?.stories)
}
