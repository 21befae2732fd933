pub mod assignment_service;
pub mod campaign_overlay;
pub mod campaigns;
pub mod conflict_detector;
pub mod content_catalog;
pub mod decision_cache;
pub mod resolver;
pub mod schedule_rules;
pub mod schedule_store;
pub mod week_preview;
