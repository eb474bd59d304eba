//! Static region and country name tables

use std::collections::HashMap;
use std::sync::Arc;

const REGION_NAMES: &[(&str, &str)] = &[
    ("AN", "Andaman and Nicobar"),
    ("AP", "Andhra Pradesh"),
    ("AR", "Arunachal Pradesh"),
    ("AS", "Assam"),
    ("BR", "Bihar"),
    ("CH", "Chandigarh"),
    ("CT", "Chhattisgarh"),
    ("DD", "Daman and Diu"),
    ("DL", "Delhi"),
    ("DN", "Dadra and Nagar Haveli"),
    ("GA", "Goa"),
    ("GJ", "Gujarat"),
    ("HP", "Himachal Pradesh"),
    ("HR", "Haryana"),
    ("JH", "Jharkhand"),
    ("JK", "Jammu and Kashmir"),
    ("KA", "Karnataka"),
    ("KL", "Kerala"),
    ("LA", "Ladakh"),
    ("LD", "Lakshadweep"),
    ("MH", "Maharashtra"),
    ("ML", "Meghalaya"),
    ("MN", "Manipur"),
    ("MP", "Madhya Pradesh"),
    ("MZ", "Mizoram"),
    ("NL", "Nagaland"),
    ("OR", "Odisha"),
    ("PB", "Punjab"),
    ("PY", "Puducherry"),
    ("RJ", "Rajasthan"),
    ("SK", "Sikkim"),
    ("TN", "Tamil Nadu"),
    ("TG", "Telangana"),
    ("TR", "Tripura"),
    ("UP", "Uttar Pradesh"),
    ("UT", "Uttarakhand"),
    ("WB", "West Bengal"),
    ("CA", "California"),
    ("NY", "New York"),
    ("TX", "Texas"),
    ("FL", "Florida"),
    ("ENG", "England"),
];

const COUNTRY_NAMES: &[(&str, &str)] = &[
    ("IN", "India"),
    ("US", "United States"),
    ("GB", "United Kingdom"),
    ("CA", "Canada"),
    ("AU", "Australia"),
    ("DE", "Germany"),
    ("FR", "France"),
    ("CN", "China"),
    ("JP", "Japan"),
    ("RU", "Russia"),
    ("BR", "Brazil"),
    ("IT", "Italy"),
    ("ES", "Spain"),
    ("NL", "Netherlands"),
    ("SG", "Singapore"),
    ("AE", "UAE"),
    ("SA", "Saudi Arabia"),
    ("NP", "Nepal"),
    ("LK", "Sri Lanka"),
    ("BD", "Bangladesh"),
    ("PK", "Pakistan"),
    ("ID", "Indonesia"),
    ("TH", "Thailand"),
    ("VN", "Vietnam"),
    ("PH", "Philippines"),
    ("MY", "Malaysia"),
];

/// Code-to-name lookups for regions and countries.
///
/// Built once at startup and shared behind an `Arc`; both lookups are total
/// and return the code itself when it is not in the table.
#[derive(Debug, Clone)]
pub struct LocationNames {
    regions: Arc<HashMap<&'static str, &'static str>>,
    countries: Arc<HashMap<&'static str, &'static str>>,
}

impl LocationNames {
    pub fn new() -> Self {
        Self {
            regions: Arc::new(REGION_NAMES.iter().copied().collect()),
            countries: Arc::new(COUNTRY_NAMES.iter().copied().collect()),
        }
    }

    pub fn region_name<'a>(&self, code: &'a str) -> &'a str {
        self.regions.get(code).copied().unwrap_or(code)
    }

    pub fn country_name<'a>(&self, code: &'a str) -> &'a str {
        self.countries.get(code).copied().unwrap_or(code)
    }
}

impl Default for LocationNames {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_codes_translate() {
        let names = LocationNames::new();
        assert_eq!(names.region_name("MH"), "Maharashtra");
        assert_eq!(names.region_name("ENG"), "England");
        assert_eq!(names.country_name("IN"), "India");
        assert_eq!(names.country_name("AE"), "UAE");
    }

    #[test]
    fn unknown_codes_pass_through() {
        let names = LocationNames::new();
        assert_eq!(names.region_name("ZZ"), "ZZ");
        assert_eq!(names.country_name("Atlantis"), "Atlantis");
    }
}
