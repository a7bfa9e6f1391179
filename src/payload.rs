//! Deterministic payload generation for both benchmark families.
//!
//! Two families share the same three size classes:
//!
//! ```text
//! family     small                 medium                 large
//! document   1 status object       20 catalog items       100 listing items (deep)
//! records    10 x {id,name}        100 x 7-field record   1000 x nested record
//! ```
//!
//! Documents are what the HTTP fixture serves; they are newline-terminated,
//! as a streaming JSON encoder writes them. Records are the decode targets of
//! the JSON suite and are written compact with no trailing newline.
//!
//! Timestamps and identifiers come from a ChaCha stream derived from the
//! run seed, so the same seed always yields the same bytes.

use clap::ValueEnum;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Named payload magnitude.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SizeClass {
    Small,
    Medium,
    Large,
}

impl SizeClass {
    pub const ALL: [SizeClass; 3] = [SizeClass::Small, SizeClass::Medium, SizeClass::Large];

    pub fn as_str(&self) -> &'static str {
        match self {
            SizeClass::Small => "small",
            SizeClass::Medium => "medium",
            SizeClass::Large => "large",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadFamily {
    /// HTTP response bodies.
    Document,
    /// JSON arrays of typed records.
    Records,
}

impl PayloadFamily {
    pub fn item_count(&self, size: SizeClass) -> usize {
        match (self, size) {
            (PayloadFamily::Document, SizeClass::Small) => 1,
            (PayloadFamily::Document, SizeClass::Medium) => 20,
            (PayloadFamily::Document, SizeClass::Large) => 100,
            (PayloadFamily::Records, SizeClass::Small) => 10,
            (PayloadFamily::Records, SizeClass::Medium) => 100,
            (PayloadFamily::Records, SizeClass::Large) => 1_000,
        }
    }
}

// Documents.

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusDocument {
    pub message: String,
    pub count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogPage {
    pub items: Vec<CatalogItem>,
    pub count: usize,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogItem {
    pub id: u32,
    pub name: String,
    pub description: String,
    pub tags: Vec<String>,
    pub metadata: ItemMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemMetadata {
    pub created_at: String,
    pub updated_at: String,
    pub active: bool,
    pub priority: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListingPage {
    pub items: Vec<ListingItem>,
    pub count: usize,
    pub status: String,
    pub total_pages: u32,
    pub current_page: u32,
    pub page_size: u32,
    pub metadata: PageMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageMetadata {
    pub api_version: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListingItem {
    pub id: u32,
    pub uuid: String,
    pub name: String,
    pub description: String,
    pub tags: Vec<String>,
    pub metadata: ListingMetadata,
    pub details: ListingDetails,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListingMetadata {
    pub created_at: String,
    pub updated_at: String,
    pub active: bool,
    pub priority: u32,
    pub category: String,
    pub subcategory: String,
    pub views: u32,
    pub favorite_count: u32,
    pub comment_count: u32,
    pub last_modified_by: String,
    pub regions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListingDetails {
    pub manufacturer: String,
    pub origin: String,
    pub year: u32,
    pub dimensions: Dimensions,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: f64,
    pub height: f64,
    pub depth: f64,
    pub weight: f64,
}

// Records.

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmallRecord {
    pub id: u32,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediumRecord {
    pub id: u32,
    pub name: String,
    pub email: String,
    pub age: u32,
    pub active: bool,
    pub created_at: String,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LargeRecord {
    pub id: u32,
    pub name: String,
    pub email: String,
    pub age: u32,
    pub active: bool,
    pub created_at: String,
    pub tags: Vec<String>,
    pub address: Address,
    pub friends: Vec<Friend>,
    pub settings: Settings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Address {
    pub street: String,
    pub city: String,
    pub state: String,
    pub zip: String,
    pub country: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Friend {
    pub id: u32,
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    pub notification: bool,
    pub theme: String,
    pub timezone: String,
    pub language: String,
    pub preferences: Preferences,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Preferences {
    pub auto_save: bool,
    pub font_size: u32,
    pub font_color: String,
}

/// Request body the HTTP suite POSTs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostBody {
    pub test: String,
    pub num: u32,
}

impl Default for PostBody {
    fn default() -> Self {
        Self {
            test: "data".to_string(),
            num: 123,
        }
    }
}

fn tags(n: usize) -> Vec<String> {
    (1..=n).map(|i| format!("tag{i}")).collect()
}

fn timestamp(rng: &mut ChaCha8Rng) -> String {
    format!(
        "2024-{:02}-{:02}T{:02}:{:02}:{:02}Z",
        rng.gen_range(1..=12u32),
        rng.gen_range(1..=28u32),
        rng.gen_range(0..24u32),
        rng.gen_range(0..60u32),
        rng.gen_range(0..60u32),
    )
}

fn family_seed(master_seed: u64, family: PayloadFamily, size: SizeClass) -> u64 {
    let base = match family {
        PayloadFamily::Document => 0u64,
        PayloadFamily::Records => 3,
    };
    let lane = base + size as u64;
    master_seed
        .wrapping_add(lane)
        .wrapping_mul(0x517cc1b727220a95)
}

fn to_json<T: Serialize>(value: &T) -> io::Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(io::Error::other)
}

/// Seeded source of benchmark payloads.
#[derive(Clone, Copy, Debug)]
pub struct PayloadGenerator {
    seed: u64,
}

impl PayloadGenerator {
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    fn rng(&self, family: PayloadFamily, size: SizeClass) -> ChaCha8Rng {
        ChaCha8Rng::seed_from_u64(family_seed(self.seed, family, size))
    }

    pub fn generate(&self, family: PayloadFamily, size: SizeClass) -> io::Result<Vec<u8>> {
        match family {
            PayloadFamily::Document => self.document(size),
            PayloadFamily::Records => self.records(size),
        }
    }

    /// Newline-terminated JSON document for the HTTP fixture.
    pub fn document(&self, size: SizeClass) -> io::Result<Vec<u8>> {
        let mut body = match size {
            SizeClass::Small => to_json(&StatusDocument {
                message: "success".to_string(),
                count: 1,
            })?,
            SizeClass::Medium => to_json(&self.catalog_page())?,
            SizeClass::Large => to_json(&self.listing_page())?,
        };
        body.push(b'\n');
        Ok(body)
    }

    pub fn records(&self, size: SizeClass) -> io::Result<Vec<u8>> {
        match size {
            SizeClass::Small => to_json(&self.small_records()),
            SizeClass::Medium => to_json(&self.medium_records()),
            SizeClass::Large => to_json(&self.large_records()),
        }
    }

    pub fn catalog_page(&self) -> CatalogPage {
        let mut rng = self.rng(PayloadFamily::Document, SizeClass::Medium);
        let n = PayloadFamily::Document.item_count(SizeClass::Medium);

        let items: Vec<CatalogItem> = (0..n as u32)
            .map(|i| CatalogItem {
                id: i,
                name: format!("Item {i}"),
                description: format!(
                    "This is item {i} with some additional text to increase payload size"
                ),
                tags: tags(5),
                metadata: ItemMetadata {
                    created_at: timestamp(&mut rng),
                    updated_at: timestamp(&mut rng),
                    active: true,
                    priority: i % 5,
                },
            })
            .collect();

        CatalogPage {
            count: items.len(),
            items,
            status: "success".to_string(),
        }
    }

    pub fn listing_page(&self) -> ListingPage {
        let mut rng = self.rng(PayloadFamily::Document, SizeClass::Large);
        let n = PayloadFamily::Document.item_count(SizeClass::Large);

        let items: Vec<ListingItem> = (0..n as u32)
            .map(|i| ListingItem {
                id: i,
                uuid: format!("uuid-{i}-{:016x}", rng.gen::<u64>()),
                name: format!("Item {i}"),
                description: format!(
                    "This is item {i} with a much longer description to increase payload size \
                     substantially. Including additional text with repeated information to make \
                     it even larger."
                ),
                tags: tags(8),
                metadata: ListingMetadata {
                    created_at: timestamp(&mut rng),
                    updated_at: timestamp(&mut rng),
                    active: true,
                    priority: i % 5,
                    category: format!("Category {}", i % 10),
                    subcategory: format!("Subcategory {}", i % 20),
                    views: i * 100,
                    favorite_count: i % 50,
                    comment_count: i % 25,
                    last_modified_by: format!("user-{}", i % 15),
                    regions: ["us-east", "us-west", "eu-central", "ap-south"]
                        .iter()
                        .map(|r| r.to_string())
                        .collect(),
                },
                details: ListingDetails {
                    manufacturer: format!("Company {}", i % 10),
                    origin: format!("Country {}", i % 30),
                    year: 2020 + (i % 5),
                    dimensions: Dimensions {
                        width: 10.5 + f64::from(i % 10),
                        height: 20.5 + f64::from(i % 15),
                        depth: 5.5 + f64::from(i % 8),
                        weight: 2.5 + f64::from(i % 10),
                    },
                },
            })
            .collect();

        ListingPage {
            count: items.len(),
            items,
            status: "success".to_string(),
            total_pages: 10,
            current_page: 1,
            page_size: 100,
            metadata: PageMetadata {
                api_version: "1.0.0".to_string(),
                timestamp: timestamp(&mut rng),
            },
        }
    }

    pub fn small_records(&self) -> Vec<SmallRecord> {
        let n = PayloadFamily::Records.item_count(SizeClass::Small);
        (0..n as u32)
            .map(|i| SmallRecord {
                id: i,
                name: format!("Name {i}"),
            })
            .collect()
    }

    pub fn medium_records(&self) -> Vec<MediumRecord> {
        let mut rng = self.rng(PayloadFamily::Records, SizeClass::Medium);
        let n = PayloadFamily::Records.item_count(SizeClass::Medium);
        (0..n as u32)
            .map(|i| MediumRecord {
                id: i,
                name: format!("Name {i}"),
                email: format!("email{i}@example.com"),
                age: 20 + (i % 50),
                active: i % 2 == 0,
                created_at: timestamp(&mut rng),
                tags: tags(3),
            })
            .collect()
    }

    pub fn large_records(&self) -> Vec<LargeRecord> {
        let mut rng = self.rng(PayloadFamily::Records, SizeClass::Large);
        let n = PayloadFamily::Records.item_count(SizeClass::Large);
        (0..n as u32)
            .map(|i| LargeRecord {
                id: i,
                name: format!("Name {i}"),
                email: format!("email{i}@example.com"),
                age: 20 + (i % 50),
                active: i % 2 == 0,
                created_at: timestamp(&mut rng),
                tags: tags(5),
                address: Address {
                    street: format!("{i} Main St"),
                    city: "Anytown".to_string(),
                    state: "ST".to_string(),
                    zip: "12345".to_string(),
                    country: "Country".to_string(),
                },
                friends: (0..5)
                    .map(|j| Friend {
                        id: j,
                        name: format!("Friend {j}"),
                        email: format!("friend{j}@example.com"),
                    })
                    .collect(),
                settings: Settings {
                    notification: true,
                    theme: "dark".to_string(),
                    timezone: "UTC".to_string(),
                    language: "en".to_string(),
                    preferences: Preferences {
                        auto_save: true,
                        font_size: 12,
                        font_color: "#333333".to_string(),
                    },
                },
            })
            .collect()
    }
}

pub fn sample_file_name(size: SizeClass) -> String {
    format!("{}.json", size.as_str())
}

/// Write `small.json`, `medium.json` and `large.json` (record family) into `dir`.
pub fn write_sample_files<P: AsRef<Path>>(
    dir: P,
    generator: &PayloadGenerator,
) -> io::Result<Vec<PathBuf>> {
    let dir = dir.as_ref();
    fs::create_dir_all(dir)?;

    let mut written = Vec::with_capacity(SizeClass::ALL.len());
    for size in SizeClass::ALL {
        let path = dir.join(sample_file_name(size));
        let file = File::create(&path)?;
        let mut writer = BufWriter::with_capacity(64 * 1024, file);
        writer.write_all(&generator.records(size)?)?;
        writer.flush()?;
        written.push(path);
    }
    Ok(written)
}

pub fn read_sample_file<P: AsRef<Path>>(dir: P, size: SizeClass) -> io::Result<Vec<u8>> {
    fs::read(dir.as_ref().join(sample_file_name(size)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_small_document_is_fixed() {
        let body = PayloadGenerator::new(0).document(SizeClass::Small).unwrap();
        assert_eq!(body, b"{\"message\":\"success\",\"count\":1}\n");
        assert_eq!(body.len(), 32);
    }

    #[test]
    fn test_generate_deterministic() {
        let a = PayloadGenerator::new(42);
        let b = PayloadGenerator::new(42);
        for size in SizeClass::ALL {
            for family in [PayloadFamily::Document, PayloadFamily::Records] {
                assert_eq!(
                    a.generate(family, size).unwrap(),
                    b.generate(family, size).unwrap()
                );
            }
        }
    }

    #[test]
    fn test_seed_changes_content_not_magnitude() {
        let a = PayloadGenerator::new(1).document(SizeClass::Large).unwrap();
        let b = PayloadGenerator::new(2).document(SizeClass::Large).unwrap();
        assert_ne!(a, b);

        let (lo, hi) = (a.len().min(b.len()) as f64, a.len().max(b.len()) as f64);
        assert!(hi / lo < 1.05);
    }

    #[test]
    fn test_size_classes_are_ordered() {
        let gen = PayloadGenerator::new(7);
        for family in [PayloadFamily::Document, PayloadFamily::Records] {
            let small = gen.generate(family, SizeClass::Small).unwrap().len();
            let medium = gen.generate(family, SizeClass::Medium).unwrap().len();
            let large = gen.generate(family, SizeClass::Large).unwrap().len();
            assert!(small < medium && medium < large, "{family:?}");
        }
    }

    #[test]
    fn test_documents_parse_back() {
        let gen = PayloadGenerator::new(3);

        let page: CatalogPage =
            serde_json::from_slice(&gen.document(SizeClass::Medium).unwrap()).unwrap();
        assert_eq!(page.items.len(), 20);
        assert_eq!(page.count, 20);

        let page: ListingPage =
            serde_json::from_slice(&gen.document(SizeClass::Large).unwrap()).unwrap();
        assert_eq!(page.items.len(), 100);
        assert_eq!(page.items[99].metadata.regions.len(), 4);
    }

    #[test]
    fn test_write_and_read() {
        let gen = PayloadGenerator::new(123);
        let dir = tempdir().unwrap();

        let paths = write_sample_files(dir.path(), &gen).unwrap();
        assert_eq!(paths.len(), 3);

        let small: Vec<SmallRecord> =
            serde_json::from_slice(&read_sample_file(dir.path(), SizeClass::Small).unwrap())
                .unwrap();
        assert_eq!(small, gen.small_records());

        let medium: Vec<MediumRecord> =
            serde_json::from_slice(&read_sample_file(dir.path(), SizeClass::Medium).unwrap())
                .unwrap();
        assert_eq!(medium.len(), 100);

        let large: Vec<LargeRecord> =
            serde_json::from_slice(&read_sample_file(dir.path(), SizeClass::Large).unwrap())
                .unwrap();
        assert_eq!(large.len(), 1_000);
        assert!(large.iter().all(|r| r.friends.len() == 5));
    }
}
