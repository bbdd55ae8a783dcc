//! INI file loading.

use std::collections::BTreeMap;
use std::fmt::Display;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use ini::{Ini, Properties};
use tracing::{info, warn};

use super::settings::{AppConfig, GeneralConfig};
use super::ConfigError;
use crate::backend::{BackendDescriptor, ProtocolKind};
use crate::detection::MergePolicy;
use crate::tiling::{TileRow, TilingConfig};

const GENERAL_KEYS: &[&str] = &[
    "min_confidence",
    "iou_threshold",
    "inactive_check_interval_secs",
    "merge_policy",
];

const BACKEND_KEYS: &[&str] = &[
    "type",
    "host",
    "port",
    "endpoint",
    "tls",
    "timeout_secs",
    "ema_alpha",
    "max_batch_size",
    "labels",
    "jpeg_quality",
];

const PLAN_KEYS: &[&str] = &["name", "expected_width", "expected_height"];

const ROW_KEYS: &[&str] = &[
    "y",
    "height",
    "width",
    "overlap",
    "scale_width",
    "x_start_percent",
    "x_end_percent",
];

/// Read and validate a configuration file.
pub fn load(path: impl AsRef<Path>) -> Result<AppConfig, ConfigError> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let config = parse(&text)?;
    info!(
        path = %path.display(),
        backends = config.backends.len(),
        plans = config.plans.len(),
        "Configuration loaded"
    );
    Ok(config)
}

/// Parse and validate configuration text.
pub fn parse(text: &str) -> Result<AppConfig, ConfigError> {
    let ini = Ini::load_from_str(text)?;

    let mut general = GeneralConfig::default();
    let mut backends = Vec::new();
    let mut plan_headers: BTreeMap<u32, Section<'_>> = BTreeMap::new();
    let mut plan_rows: BTreeMap<u32, BTreeMap<usize, Section<'_>>> = BTreeMap::new();

    for (name, props) in ini.iter() {
        let Some(name) = name else {
            if props.iter().next().is_some() {
                warn!("Ignoring keys outside of any section");
            }
            continue;
        };
        let section = Section { name, props };

        match SectionKind::classify(name)? {
            SectionKind::General => general = parse_general(&section)?,
            SectionKind::Backend(backend) => backends.push(parse_backend(backend, &section)?),
            SectionKind::Plan(id) => {
                if plan_headers.insert(id, section).is_some() {
                    return Err(ConfigError::DuplicatePlan(id));
                }
            }
            SectionKind::Row(id, index) => {
                if plan_rows.entry(id).or_default().insert(index, section).is_some() {
                    return Err(ConfigError::InvalidValue {
                        section: name.to_string(),
                        key: "row".to_string(),
                        reason: format!("row {} of plan {} is defined more than once", index, id),
                    });
                }
            }
        }
    }

    let mut ids: Vec<u32> = plan_headers.keys().chain(plan_rows.keys()).copied().collect();
    ids.sort_unstable();
    ids.dedup();
    if ids.is_empty() {
        return Err(ConfigError::NoPlans);
    }

    let mut plans = Vec::with_capacity(ids.len());
    for id in ids {
        let rows = plan_rows.remove(&id).unwrap_or_default();
        plans.push(parse_plan(id, plan_headers.get(&id), rows)?);
    }

    Ok(AppConfig {
        general,
        backends,
        plans,
    })
}

enum SectionKind<'a> {
    General,
    Backend(&'a str),
    Plan(u32),
    Row(u32, usize),
}

impl<'a> SectionKind<'a> {
    fn classify(name: &'a str) -> Result<Self, ConfigError> {
        let unknown = || ConfigError::UnknownSection(name.to_string());
        let parts: Vec<&str> = name.trim().split('.').collect();

        match parts.as_slice() {
            ["general"] => Ok(SectionKind::General),
            ["backend", ..] if parts.len() > 1 => {
                let backend = name.trim()["backend.".len()..].trim();
                if backend.is_empty() {
                    return Err(unknown());
                }
                Ok(SectionKind::Backend(backend))
            }
            ["plan", id] => Ok(SectionKind::Plan(id.parse().map_err(|_| unknown())?)),
            ["plan", id, "row", index] => Ok(SectionKind::Row(
                id.parse().map_err(|_| unknown())?,
                index.parse().map_err(|_| unknown())?,
            )),
            _ => Err(unknown()),
        }
    }
}

/// Typed access to one section's keys.
struct Section<'a> {
    name: &'a str,
    props: &'a Properties,
}

impl Section<'_> {
    fn raw(&self, key: &str) -> Option<&str> {
        self.props
            .get(key)
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }

    fn invalid(&self, key: &str, reason: impl Display) -> ConfigError {
        ConfigError::InvalidValue {
            section: self.name.to_string(),
            key: key.to_string(),
            reason: reason.to_string(),
        }
    }

    fn get<T>(&self, key: &str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: Display,
    {
        self.raw(key)
            .map(|value| {
                value
                    .parse::<T>()
                    .map_err(|e| self.invalid(key, format!("'{}': {}", value, e)))
            })
            .transpose()
    }

    fn require<T>(&self, key: &str) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: Display,
    {
        self.get(key)?.ok_or_else(|| ConfigError::MissingKey {
            section: self.name.to_string(),
            key: key.to_string(),
        })
    }

    fn get_bool(&self, key: &str) -> Result<Option<bool>, ConfigError> {
        self.raw(key)
            .map(|value| match value.to_lowercase().as_str() {
                "true" | "yes" | "on" | "1" => Ok(true),
                "false" | "no" | "off" | "0" => Ok(false),
                _ => Err(self.invalid(key, format!("'{}' is not a boolean", value))),
            })
            .transpose()
    }

    fn get_secs(&self, key: &str) -> Result<Option<Duration>, ConfigError> {
        match self.get::<f64>(key)? {
            Some(secs) => Duration::try_from_secs_f64(secs)
                .map(Some)
                .map_err(|e| self.invalid(key, format!("{} seconds: {}", secs, e))),
            None => Ok(None),
        }
    }

    fn warn_unknown_keys(&self, known: &[&str]) {
        for (key, _) in self.props.iter() {
            if !known.contains(&key) {
                warn!(section = self.name, key, "Ignoring unknown configuration key");
            }
        }
    }
}

fn parse_general(section: &Section<'_>) -> Result<GeneralConfig, ConfigError> {
    section.warn_unknown_keys(GENERAL_KEYS);
    let defaults = GeneralConfig::default();

    let min_confidence = section
        .get::<f32>("min_confidence")?
        .unwrap_or(defaults.min_confidence);
    if !(0.0..=1.0).contains(&min_confidence) {
        return Err(section.invalid("min_confidence", "must be between 0 and 1"));
    }

    let iou_threshold = section
        .get::<f32>("iou_threshold")?
        .unwrap_or(defaults.iou_threshold);
    if !(iou_threshold > 0.0 && iou_threshold <= 1.0) {
        return Err(section.invalid("iou_threshold", "must be > 0 and <= 1"));
    }

    Ok(GeneralConfig {
        min_confidence,
        iou_threshold,
        inactive_check_interval: section
            .get_secs("inactive_check_interval_secs")?
            .unwrap_or(defaults.inactive_check_interval),
        merge_policy: section
            .get::<MergePolicy>("merge_policy")?
            .unwrap_or(defaults.merge_policy),
    })
}

fn parse_backend(name: &str, section: &Section<'_>) -> Result<BackendDescriptor, ConfigError> {
    section.warn_unknown_keys(BACKEND_KEYS);

    let protocol: ProtocolKind = section.require("type")?;
    let host: String = section.require("host")?;
    let port: u32 = section.require("port")?;
    let port = u16::try_from(port)
        .map_err(|_| section.invalid("port", format!("{} must be between 0 and 65535", port)))?;

    let mut descriptor = BackendDescriptor::new(name, host, port, protocol);
    if let Some(endpoint) = section.raw("endpoint") {
        descriptor = descriptor.with_endpoint(endpoint);
    }
    if let Some(tls) = section.get_bool("tls")? {
        descriptor = descriptor.with_tls(tls);
    }
    if let Some(timeout) = section.get_secs("timeout_secs")? {
        descriptor = descriptor.with_timeout(timeout);
    }
    if let Some(alpha) = section.get::<f64>("ema_alpha")? {
        descriptor = descriptor.with_ema_alpha(alpha);
    }
    if let Some(max) = section.get::<usize>("max_batch_size")? {
        descriptor = descriptor.with_max_batch_size(max);
    }
    if let Some(quality) = section.get::<u8>("jpeg_quality")? {
        descriptor = descriptor.with_jpeg_quality(quality);
    }
    if let Some(labels) = section.raw("labels") {
        descriptor = descriptor.with_labels(
            labels
                .split(',')
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(String::from)
                .collect(),
        );
    }

    descriptor.validate()?;
    if protocol == ProtocolKind::Tensor && descriptor.labels.is_empty() {
        warn!(backend = name, "Tensor backend has no labels, classes will be named by id");
    }
    Ok(descriptor)
}

fn parse_row(section: &Section<'_>) -> Result<TileRow, ConfigError> {
    section.warn_unknown_keys(ROW_KEYS);

    Ok(TileRow::new(
        section.require("y")?,
        section.require("height")?,
        section.require("width")?,
        section.get("overlap")?.unwrap_or(0.0),
        section.require("scale_width")?,
    )
    .with_x_span(
        section.get("x_start_percent")?,
        section.get("x_end_percent")?,
    ))
}

fn parse_plan(
    id: u32,
    header: Option<&Section<'_>>,
    rows: BTreeMap<usize, Section<'_>>,
) -> Result<TilingConfig, ConfigError> {
    let name = match header {
        Some(section) => {
            section.warn_unknown_keys(PLAN_KEYS);
            section
                .raw("name")
                .map(String::from)
                .unwrap_or_else(|| format!("plan {}", id))
        }
        None => format!("plan {}", id),
    };

    let rows = rows
        .values()
        .map(parse_row)
        .collect::<Result<Vec<_>, _>>()?;
    let plan = TilingConfig::new(id, name, rows)?;

    let Some(section) = header else {
        return Ok(plan);
    };
    match (
        section.get::<u32>("expected_width")?,
        section.get::<u32>("expected_height")?,
    ) {
        (Some(width), Some(height)) => plan.with_expected_size(width, height),
        (None, None) => Ok(plan),
        _ => Err(ConfigError::InvalidPlan {
            plan: plan.name().to_string(),
            reason: "expected_width and expected_height must be given together".to_string(),
        }),
    }
}
