/// Canonical field names shared by promotion rules, sinks and the store.
/// These are the keys accepted under `promotion_rules` in the config file.

pub const COMPANY_NAME: &str = "company_name";
pub const URL: &str = "url";
pub const PHONE_NUMBER: &str = "phone_number";
pub const INDUSTRY: &str = "industry";
pub const IS_B2B: &str = "is_b2b";
pub const CUSTOMER_TARGET_SEGMENTS: &str = "customer_target_segments";
pub const TAGS: &str = "tags";
pub const ADDITIONAL_INFO: &str = "additional_info";

/// Canonical fields a promotion rule may target
pub const PROMOTABLE_FIELDS: [&str; 6] = [
    COMPANY_NAME,
    URL,
    PHONE_NUMBER,
    INDUSTRY,
    IS_B2B,
    CUSTOMER_TARGET_SEGMENTS,
];

/// Profile used when no configured `file_name_contains` matches
pub const DEFAULT_PROFILE: &str = "default";

// Side sink locations when the config does not override them
pub const DEFAULT_INVALID_RECORDS_DIR: &str = "etl/invalid_records";
pub const DEFAULT_DROPPED_DUPLICATES_DIR: &str = "etl/dropped_duplicates";

pub const DEFAULT_COMPANY_NAME_THRESHOLD: u8 = 90;

/// Extensions the file row source knows how to read
pub const SUPPORTED_EXTENSIONS: [&str; 3] = ["csv", "xlsx", "xls"];

// Table names
pub const CONTACTS_TABLE: &str = "contacts";
pub const PROFILES_TABLE: &str = "contact_profiles";

/// Contact status values
pub const STATUS_ACTIVE: &str = "active";
pub const STATUS_USED: &str = "used";

/// Column names recognised by `batch-update` when harvesting phone numbers
pub const BATCH_PHONE_COLUMNS: [&str; 2] = ["Company Phone", "Number"];

/// Timestamp format used in side sink file names
pub const SINK_TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";
