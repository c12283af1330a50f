//! Operator commands over the contact store and the side-sink folders:
//! viewing and exporting contacts, auditing a single contact, marking
//! contacts as used and resetting the store.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

use crate::constants::BATCH_PHONE_COLUMNS;
use crate::error::Result;
use crate::pipeline::ingestion::{FileRowSource, RowSource};
use crate::pipeline::processing::normalize::coalesce;
use crate::pipeline::processing::quality_gate::clean_phone;
use crate::storage::SqliteStore;
use crate::types::Contact;

const EXPORT_COLUMNS: [&str; 14] = [
    "id",
    "company_name",
    "url",
    "phone_number",
    "is_b2b",
    "industry",
    "customer_target_segments",
    "additional_info",
    "tags",
    "status",
    "last_used",
    "profile_id",
    "created_at",
    "updated_at",
];

/// Outcome of `batch_update`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchUpdateReport {
    /// Unique normalized phone numbers harvested from the source files
    pub phones_found: usize,
    /// Contacts matching them (report-only) or updated
    pub contacts: usize,
    pub report_only: bool,
}

pub fn view_contacts(store: &SqliteStore, limit: usize) -> Result<Vec<Contact>> {
    info!("Fetching the last {} contacts...", limit);
    let contacts = store.recent_contacts(limit)?;
    if contacts.is_empty() {
        println!("No contacts found in the database.");
        return Ok(contacts);
    }

    println!("--- Most Recent Contacts ---");
    println!("{:>6}  {:<32} {:<16} {:<20} {}", "id", "company_name", "phone_number", "industry", "created_at");
    for contact in &contacts {
        println!(
            "{:>6}  {:<32} {:<16} {:<20} {}",
            contact.id,
            contact.company_name,
            contact.phone_number.as_deref().unwrap_or("-"),
            contact.industry.as_deref().unwrap_or("-"),
            contact.created_at.format("%Y-%m-%d %H:%M:%S")
        );
    }
    println!("--------------------------");
    Ok(contacts)
}

pub fn count_contacts(store: &SqliteStore) -> Result<usize> {
    let count = store.count_contacts()?;
    println!("📊 Total contacts: {count}");
    Ok(count)
}

/// Write every contact to a CSV file. Returns the number of rows written.
pub fn export_contacts(store: &SqliteStore, path: &Path) -> Result<usize> {
    info!("Exporting all contacts to {}...", path.display());
    let contacts = store.all_contacts()?;
    if contacts.is_empty() {
        println!("No contacts to export.");
        return Ok(0);
    }

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(EXPORT_COLUMNS)?;
    for contact in &contacts {
        writer.write_record([
            contact.id.to_string(),
            contact.company_name.clone(),
            contact.url.clone().unwrap_or_default(),
            contact.phone_number.clone().unwrap_or_default(),
            contact.is_b2b.map(|b| b.to_string()).unwrap_or_default(),
            contact.industry.clone().unwrap_or_default(),
            contact.customer_target_segments.clone().unwrap_or_default(),
            serde_json::to_string(&contact.additional_info)?,
            serde_json::to_string(&contact.tags)?,
            contact.status.clone(),
            contact.last_used.map(|t| t.to_rfc3339()).unwrap_or_default(),
            contact.profile_id.map(|id| id.to_string()).unwrap_or_default(),
            contact.created_at.to_rfc3339(),
            contact.updated_at.to_rfc3339(),
        ])?;
    }
    writer.flush()?;

    info!("Successfully exported {} contacts to {}", contacts.len(), path.display());
    println!("📤 Exported {} contacts to {}", contacts.len(), path.display());
    Ok(contacts.len())
}

pub fn view_profiles(store: &SqliteStore) -> Result<()> {
    let profiles = store.profiles()?;
    if profiles.is_empty() {
        println!("No contact profiles found.");
        return Ok(());
    }

    println!("--- Contact Data Profiles ---");
    for profile in &profiles {
        println!("\nProfile ID: {} ({} contacts)", profile.id, profile.contact_count);
        println!("  Keys: {}", profile.json_keys.join(", "));
    }
    println!("\n---------------------------");
    Ok(())
}

/// Print the promoted fields and the full original row of one contact.
/// Returns `false` when there is no such contact.
pub fn audit_contact(store: &SqliteStore, id: i64) -> Result<bool> {
    info!("Generating audit report for contact ID: {}", id);
    let Some(contact) = store.contact_by_id(id)? else {
        println!("Error: No contact found with ID: {id}");
        return Ok(false);
    };
    print_audit(&contact);
    Ok(true)
}

/// Same as [`audit_contact`], looking the contact up by phone number.
/// The number is cleaned the way the pipeline cleans it before lookup.
pub fn audit_contact_by_phone(store: &SqliteStore, phone: &str) -> Result<bool> {
    info!("Generating audit report for phone number: {}", phone);
    let contact = match clean_phone(phone) {
        Some(cleaned) => store.contact_by_phone(&cleaned)?,
        None => None,
    };
    let Some(contact) = contact else {
        println!("Error: No contact found with phone number: {phone}");
        return Ok(false);
    };
    print_audit(&contact);
    Ok(true)
}

fn print_audit(contact: &Contact) {
    let id = contact.id;
    println!("\n--- Audit Report for Contact ID: {id} ---");
    println!("\n== Main Database Fields ==");
    let promoted = [
        ("Company Name", contact.company_name.clone()),
        ("Phone Number", contact.phone_number.clone().unwrap_or_default()),
        ("URL", contact.url.clone().unwrap_or_default()),
        ("Industry", contact.industry.clone().unwrap_or_default()),
        ("Is B2B", contact.is_b2b.map(|b| b.to_string()).unwrap_or_else(|| "unknown".to_string())),
        ("Tags", contact.tags.join(", ")),
        ("Status", contact.status.clone()),
        ("Profile ID", contact.profile_id.map(|p| p.to_string()).unwrap_or_default()),
        ("Created At", contact.created_at.to_rfc3339()),
    ];
    for (label, value) in promoted {
        println!("{:<15} {}", format!("{label}:"), value);
    }

    println!("\n== Full Original Data (from additional_info) ==");
    if contact.additional_info.is_empty() {
        println!("No additional information found.");
    } else {
        // serde_json maps iterate in key order
        for (key, value) in &contact.additional_info {
            println!("- {:<30} {}", format!("{key}:"), value);
        }
    }
    println!("\n-----------------------------------------");
}

/// CSV files waiting in a side-sink folder, sorted by name
pub fn list_pending_files(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut files: Vec<PathBuf> = entries
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && p.extension().map_or(false, |ext| ext.eq_ignore_ascii_case("csv")))
        .collect();
    files.sort();
    files
}

/// Print the files in a side-sink folder under `title`
pub fn check_folder(dir: &Path, title: &str, empty_message: &str) -> Vec<PathBuf> {
    info!("Checking for files in {}...", dir.display());
    let files = list_pending_files(dir);
    if files.is_empty() {
        println!("{empty_message}");
        return files;
    }

    println!("--- {title} ---");
    for file in &files {
        if let Some(name) = file.file_name() {
            println!("- {}", name.to_string_lossy());
        }
    }
    println!("-----------------------------");
    files
}

/// Phone numbers listed one per line, normalized the way the cleaner does
pub fn read_phone_list(path: &Path) -> Result<BTreeSet<String>> {
    let content = fs::read_to_string(path)?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(clean_phone)
        .collect())
}

/// Phone numbers from every CSV in `dir`, taken from the first recognised
/// phone column of each file. Unreadable files are logged and skipped.
pub fn collect_batch_phones(dir: &Path) -> Result<BTreeSet<String>> {
    let files = list_pending_files(dir);
    if files.is_empty() {
        warn!("No CSV files found in directory: {}", dir.display());
        return Ok(BTreeSet::new());
    }
    info!("Found {} CSV files to process.", files.len());

    let mut phones = BTreeSet::new();
    for path in files {
        let rows = match FileRowSource.extract(&path) {
            Ok(rows) => rows,
            Err(e) => {
                error!("Failed to process file {}: {}", path.display(), e);
                continue;
            }
        };

        let Some(column) = rows.first().and_then(|first| {
            BATCH_PHONE_COLUMNS
                .iter()
                .find(|c| first.contains_key(**c))
                .map(|c| c.to_string())
        }) else {
            warn!("No recognized phone number column found in {}. Skipping.", path.display());
            continue;
        };

        info!("Extracting phone numbers from '{}' column in {}...", column, path.display());
        let candidates = [column];
        phones.extend(
            rows.iter()
                .filter_map(|row| coalesce(row, &candidates))
                .filter_map(|phone| clean_phone(&phone)),
        );
    }
    Ok(phones)
}

/// Mark the contacts owning `phones` as used, tagging them with `tag`
pub fn update_status(store: &mut SqliteStore, phones: &BTreeSet<String>, tag: &str) -> Result<usize> {
    if phones.is_empty() {
        warn!("No valid phone numbers found in the input.");
        return Ok(0);
    }
    info!("Found {} unique phone numbers to process.", phones.len());

    let updated = store.mark_used(phones, tag)?;
    info!("Update process finished. Successfully updated {} contacts.", updated);
    println!("✅ Updated {updated} contacts");
    Ok(updated)
}

/// Harvest phone numbers from a folder of exports, then report or update
pub fn batch_update(store: &mut SqliteStore, dir: &Path, report_only: bool, tag: &str) -> Result<BatchUpdateReport> {
    info!("--- Starting Batch Contact Status Update from directory: {} ---", dir.display());
    let phones = collect_batch_phones(dir)?;

    let contacts = if phones.is_empty() {
        warn!("No valid phone numbers found across all files.");
        0
    } else if report_only {
        let found = store.count_by_phones(&phones)?;
        println!("\n--- Dry Run Report ---");
        println!("Total unique phone numbers in source files: {}", phones.len());
        println!("Phone numbers found in the database: {found}");
        println!("----------------------");
        found
    } else {
        update_status(store, &phones, tag)?
    };

    Ok(BatchUpdateReport {
        phones_found: phones.len(),
        contacts,
        report_only,
    })
}

/// Delete all contacts and profiles
pub fn reset_database(store: &mut SqliteStore) -> Result<()> {
    warn!("--- Starting Database Reset ---");
    store.reset()?;
    warn!("--- Database Reset Successfully ---");
    println!("🗑️  All contacts and profiles deleted");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::STATUS_USED;
    use crate::storage::ContactStore;
    use crate::types::{CanonicalRecord, RawRow};
    use serde_json::json;

    fn seeded_store() -> SqliteStore {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let record = |name: &str, phone: &str| {
            let mut raw = RawRow::new();
            raw.insert("Company".to_string(), json!(name));
            raw.insert("Phone".to_string(), json!(phone));
            CanonicalRecord {
                company_name: Some(name.to_string()),
                url: None,
                phone_number: Some(phone.to_string()),
                industry: None,
                is_b2b: Some(false),
                customer_target_segments: None,
                tags: Vec::new(),
                additional_info: raw,
            }
        };
        store
            .persist_batch(&[record("Acme", "5551234567"), record("Globex", "5550001111")])
            .unwrap();
        store
    }

    #[test]
    fn test_read_phone_list_normalizes_and_dedups() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("phones.txt");
        fs::write(&path, "(555) 123-4567\n\n555-123-4567\n 555 000 1111 \nnan\n").unwrap();

        let phones = read_phone_list(&path).unwrap();
        assert_eq!(phones.into_iter().collect::<Vec<_>>(), vec!["5550001111", "5551234567"]);
    }

    #[test]
    fn test_update_status_marks_contacts_used() {
        let mut store = seeded_store();
        let phones: BTreeSet<String> = ["5551234567".to_string()].into();

        assert_eq!(update_status(&mut store, &phones, STATUS_USED).unwrap(), 1);
        let acme = store.contact_by_phone("5551234567").unwrap().unwrap();
        assert_eq!(acme.status, STATUS_USED);
        assert_eq!(acme.tags, vec!["used"]);
    }

    #[test]
    fn test_batch_update_reads_known_phone_columns() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.csv"), "Name,Company Phone\nAcme,(555) 123-4567\n").unwrap();
        fs::write(dir.path().join("b.csv"), "Name,Number\nGlobex,555-000-1111\nNobody,555-999-9999\n").unwrap();
        fs::write(dir.path().join("c.csv"), "Name,Fax\nInitech,1\n").unwrap();

        let mut store = seeded_store();
        let report = batch_update(&mut store, dir.path(), true, "campaign").unwrap();
        assert_eq!(report.phones_found, 3);
        assert_eq!(report.contacts, 2);
        assert_eq!(store.contact_by_phone("5551234567").unwrap().unwrap().status, "active");

        let report = batch_update(&mut store, dir.path(), false, "campaign").unwrap();
        assert_eq!(report.contacts, 2);
        let globex = store.contact_by_phone("5550001111").unwrap().unwrap();
        assert_eq!(globex.tags, vec!["campaign"]);
    }

    #[test]
    fn test_export_writes_every_contact() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("contacts.csv");
        let store = seeded_store();

        assert_eq!(export_contacts(&store, &path).unwrap(), 2);
        let mut reader = csv::Reader::from_path(&path).unwrap();
        assert_eq!(reader.headers().unwrap().len(), EXPORT_COLUMNS.len());
        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(&rows[0][1], "Acme");
        assert_eq!(&rows[0][4], "false");
    }

    #[test]
    fn test_audit_and_counts() {
        let store = seeded_store();
        assert!(audit_contact(&store, 1).unwrap());
        assert!(!audit_contact(&store, 99).unwrap());
        assert!(audit_contact_by_phone(&store, "(555) 123-4567").unwrap());
        assert!(!audit_contact_by_phone(&store, "555-999-0000").unwrap());
        assert!(!audit_contact_by_phone(&store, "nan").unwrap());
        assert_eq!(count_contacts(&store).unwrap(), 2);
        assert_eq!(view_contacts(&store, 1).unwrap().len(), 1);
    }

    #[test]
    fn test_pending_files_lists_csv_only() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("review_b.csv"), "").unwrap();
        fs::write(dir.path().join("review_a.csv"), "").unwrap();
        fs::write(dir.path().join("notes.txt"), "").unwrap();

        let files = check_folder(dir.path(), "Files for Manual Review", "empty");
        let names: Vec<_> = files.iter().map(|f| f.file_name().unwrap().to_owned()).collect();
        assert_eq!(names, vec!["review_a.csv", "review_b.csv"]);
        assert!(list_pending_files(&dir.path().join("missing")).is_empty());
    }
}
