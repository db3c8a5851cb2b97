//! Family and operator metadata used to rank origin endpoints.
//!
//! Both are read from JSON and have to pass [`FamilyMetadata::validate`] or
//! [`OperatorMetadata::validate`] before they are used. Unknown fields are rejected while
//! deserializing.
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::FamilyId;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum MetadataValidationError {
    #[error("invalid country code: {0:?}, expected ISO 3166-1 alpha-2")]
    CountryCode(String),

    #[error("invalid subdivision code: {0:?}, expected ISO 3166-2")]
    SubdivisionCode(String),

    #[error("latitude {0} is out of range [-90, 90]")]
    Latitude(f64),

    #[error("longitude {0} is out of range [-180, 180]")]
    Longitude(f64),

    #[error("unsupported url scheme in {0}, expected http or https")]
    UrlScheme(Url),
}

/// Continents as used by geographic areas
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Continent {
    Af,
    An,
    As,
    Eu,
    Na,
    Oc,
    Sa,
}

/// A geographic area covered by a family
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum GeoArea {
    ContinentCode(Continent),
    CountryCode(String),
    SubdivisionCode(String),
}

impl GeoArea {
    fn validate(&self) -> Result<(), MetadataValidationError> {
        match self {
            Self::ContinentCode(_) => Ok(()),
            Self::CountryCode(code) => validate_country_code(code),
            Self::SubdivisionCode(code) => validate_subdivision_code(code),
        }
    }

    /// Whether a node located in `country_code` lies in this area.
    ///
    /// Node locations only carry a country, so continent areas never match and a subdivision
    /// matches on its country part.
    pub fn covers_country(&self, country_code: &str) -> bool {
        match self {
            Self::ContinentCode(_) => false,
            Self::CountryCode(code) => code.eq_ignore_ascii_case(country_code),
            Self::SubdivisionCode(code) => code
                .split_once('-')
                .is_some_and(|(country, _)| country.eq_ignore_ascii_case(country_code)),
        }
    }
}

/// Metadata of the family the serving node belongs to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct FamilyMetadata {
    pub family_id: FamilyId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub areas: Vec<GeoArea>,
    #[serde(default)]
    pub latency_test_targets: Vec<Url>,
}

impl FamilyMetadata {
    pub fn validate(&self) -> Result<(), MetadataValidationError> {
        for area in &self.areas {
            area.validate()?;
        }
        for target in &self.latency_test_targets {
            validate_http_url(target)?;
        }
        Ok(())
    }

    /// Whether any area of the family covers `country_code`
    pub fn covers_country(&self, country_code: &str) -> bool {
        self.areas.iter().any(|a| a.covers_country(country_code))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct NodeLocation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coordinates: Option<Coordinates>,
}

impl NodeLocation {
    fn validate(&self) -> Result<(), MetadataValidationError> {
        if let Some(code) = &self.country_code {
            validate_country_code(code)?;
        }
        if let Some(Coordinates {
            latitude,
            longitude,
        }) = self.coordinates
        {
            if !(-90.0..=90.0).contains(&latitude) {
                return Err(MetadataValidationError::Latitude(latitude));
            }
            if !(-180.0..=180.0).contains(&longitude) {
                return Err(MetadataValidationError::Longitude(longitude));
            }
        }
        Ok(())
    }
}

/// Metadata a storage operator declares for its node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct OperatorMetadata {
    pub endpoint: Url,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family_id: Option<FamilyId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<NodeLocation>,
    #[serde(default)]
    pub latency_test_targets: Vec<Url>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub declared_latency_ms: Option<u64>,
}

impl OperatorMetadata {
    pub fn validate(&self) -> Result<(), MetadataValidationError> {
        validate_http_url(&self.endpoint)?;
        for target in &self.latency_test_targets {
            validate_http_url(target)?;
        }
        if let Some(location) = &self.location {
            location.validate()?;
        }
        Ok(())
    }

    pub fn country_code(&self) -> Option<&str> {
        self.location.as_ref()?.country_code.as_deref()
    }
}

fn validate_http_url(url: &Url) -> Result<(), MetadataValidationError> {
    match url.scheme() {
        "http" | "https" => Ok(()),
        _ => Err(MetadataValidationError::UrlScheme(url.clone())),
    }
}

fn is_country_code(code: &str) -> bool {
    code.len() == 2 && code.bytes().all(|b| b.is_ascii_uppercase())
}

fn validate_country_code(code: &str) -> Result<(), MetadataValidationError> {
    if is_country_code(code) {
        Ok(())
    } else {
        Err(MetadataValidationError::CountryCode(code.to_string()))
    }
}

fn validate_subdivision_code(code: &str) -> Result<(), MetadataValidationError> {
    let valid = code.split_once('-').is_some_and(|(country, sub)| {
        is_country_code(country)
            && (1..=3).contains(&sub.len())
            && sub
                .bytes()
                .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit())
    });
    if valid {
        Ok(())
    } else {
        Err(MetadataValidationError::SubdivisionCode(code.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parse_family_metadata() {
        let family: FamilyMetadata = serde_json::from_str(
            r#"{
                "familyId": "eu-west",
                "region": "europe",
                "areas": [
                    {"continentCode": "EU"},
                    {"countryCode": "DE"},
                    {"subdivisionCode": "FR-75"}
                ],
                "latencyTestTargets": ["https://probe.example.com/ping"]
            }"#,
        )
        .unwrap();
        family.validate().unwrap();
        assert_eq!(
            family.areas,
            vec![
                GeoArea::ContinentCode(Continent::Eu),
                GeoArea::CountryCode("DE".to_string()),
                GeoArea::SubdivisionCode("FR-75".to_string()),
            ]
        );
        assert!(family.covers_country("DE"));
        assert!(family.covers_country("FR"));
        assert!(!family.covers_country("US"));
    }

    #[test]
    fn reject_unknown_family_fields() {
        serde_json::from_str::<FamilyMetadata>(r#"{"familyId": "a", "bogus": 1}"#).unwrap_err();
        serde_json::from_str::<FamilyMetadata>(r#"{"familyId": "a", "areas": [{"planet": "X"}]}"#)
            .unwrap_err();
    }

    #[test]
    fn reject_malformed_codes() {
        let mut family: FamilyMetadata = serde_json::from_str(r#"{"familyId": "a"}"#).unwrap();
        family.areas = vec![GeoArea::CountryCode("Germany".to_string())];
        assert_eq!(
            family.validate().unwrap_err(),
            MetadataValidationError::CountryCode("Germany".to_string())
        );
        family.areas = vec![GeoArea::SubdivisionCode("FR75".to_string())];
        assert_eq!(
            family.validate().unwrap_err(),
            MetadataValidationError::SubdivisionCode("FR75".to_string())
        );
    }

    #[test]
    fn validate_operator_metadata() {
        let operator: OperatorMetadata = serde_json::from_str(
            r#"{
                "endpoint": "https://storage-1.example.com/storage",
                "location": {"countryCode": "DE", "coordinates": {"latitude": 52.5, "longitude": 13.4}},
                "declaredLatencyMs": 40
            }"#,
        )
        .unwrap();
        operator.validate().unwrap();
        assert_eq!(operator.country_code(), Some("DE"));

        let mut bad = operator.clone();
        bad.location = Some(NodeLocation {
            coordinates: Some(Coordinates {
                latitude: 91.0,
                longitude: 0.0,
            }),
            ..Default::default()
        });
        assert_eq!(
            bad.validate().unwrap_err(),
            MetadataValidationError::Latitude(91.0)
        );

        let mut bad = operator;
        bad.endpoint = "ftp://storage.example.com".parse().unwrap();
        assert!(matches!(
            bad.validate().unwrap_err(),
            MetadataValidationError::UrlScheme(_)
        ));
    }
}
