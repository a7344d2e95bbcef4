pub mod ports;
pub mod ingest_use_case;
pub mod dedupe_use_case;
pub mod festival_use_case;
pub mod health_use_case;
