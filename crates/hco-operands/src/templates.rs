//! Data import cron template assembly
//!
//! Two sources feed the templates on the SSP operand:
//! - the operator's defaults, loaded once from `dataImportCronTemplates.yaml`
//!   and held by a [`TemplateRegistry`]
//! - the caller's list from `spec.dataImportCronTemplates`
//!
//! Defaults are consumed only when `enableCommonBootImageImport` is on.
//! Names must be unique across whatever is actually assembled; a clash is a
//! validation error, never a silent de-duplication.

use std::collections::HashSet;
use std::path::Path;

use hco_common::crd::DataImportCronTemplate;
use hco_common::{Error, Result};
use parking_lot::RwLock;
use rand::Rng;
use tracing::{debug, info, warn};

/// File the default templates are read from, inside the templates directory
pub const TEMPLATES_FILE_NAME: &str = "dataImportCronTemplates.yaml";

/// Parent spec field that carries caller templates
const CALLER_FIELD: &str = "spec.dataImportCronTemplates";

/// Schedule with a random minute, every twelve hours
///
/// Spreads imports of many clusters over the hour.
pub fn random_schedule() -> String {
    let minute = rand::rng().random_range(0..=59);
    format!("{minute} */12 * * *")
}

/// Merge default and caller templates
///
/// Returns `None` for an empty result. With the gate off the defaults are
/// ignored; with it on, defaults come first, followed by caller entries,
/// in a vector sized exactly to the combined length.
pub fn assemble_templates(
    defaults: &[DataImportCronTemplate],
    default_names: &HashSet<String>,
    caller: Option<&[DataImportCronTemplate]>,
    enabled: bool,
) -> Result<Option<Vec<DataImportCronTemplate>>> {
    let caller = caller.unwrap_or_default();

    let mut seen = HashSet::with_capacity(caller.len());
    for tmpl in caller {
        if !seen.insert(tmpl.name()) {
            return Err(Error::validation_for_field(
                tmpl.name(),
                CALLER_FIELD,
                format!("{} already exists", tmpl.name()),
            ));
        }
        if enabled && default_names.contains(tmpl.name()) {
            return Err(Error::validation_for_field(
                tmpl.name(),
                CALLER_FIELD,
                format!("{} is already defined by the operator defaults", tmpl.name()),
            ));
        }
    }

    if !enabled || defaults.is_empty() {
        return Ok((!caller.is_empty()).then(|| caller.to_vec()));
    }
    if caller.is_empty() {
        return Ok(Some(defaults.to_vec()));
    }

    let mut merged = Vec::with_capacity(defaults.len() + caller.len());
    merged.extend_from_slice(defaults);
    merged.extend_from_slice(caller);
    Ok(Some(merged))
}

#[derive(Default)]
struct Defaults {
    list: Vec<DataImportCronTemplate>,
    names: HashSet<String>,
}

impl Defaults {
    fn from_list(list: Vec<DataImportCronTemplate>) -> Self {
        let names = list.iter().map(|t| t.name().to_string()).collect();
        Self { list, names }
    }
}

/// Process-wide default templates
///
/// Reloads and schedule pins take the write lock and swap in fully built
/// state, so readers never see a half-loaded list.
#[derive(Default)]
pub struct TemplateRegistry {
    inner: RwLock<Defaults>,
}

impl TemplateRegistry {
    /// Registry with no defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the given defaults
    pub fn with_templates(list: Vec<DataImportCronTemplate>) -> Self {
        Self {
            inner: RwLock::new(Defaults::from_list(list)),
        }
    }

    /// Replace the defaults with the contents of `dir/dataImportCronTemplates.yaml`
    ///
    /// A missing directory or file leaves the registry empty and is not an
    /// error. A malformed file also empties the registry, then errors.
    pub fn load_from_dir(&self, dir: &Path) -> Result<usize> {
        let file = dir.join(TEMPLATES_FILE_NAME);
        let raw = match std::fs::read_to_string(&file) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %file.display(), "no default templates file");
                *self.inner.write() = Defaults::default();
                return Ok(0);
            }
            Err(e) => {
                *self.inner.write() = Defaults::default();
                return Err(Error::internal_with_context(
                    "template-load",
                    format!("can't read {}: {e}", file.display()),
                ));
            }
        };

        if raw.trim().is_empty() {
            *self.inner.write() = Defaults::default();
            return Ok(0);
        }

        match serde_yaml::from_str::<Option<Vec<DataImportCronTemplate>>>(&raw) {
            Ok(list) => {
                let defaults = Defaults::from_list(list.unwrap_or_default());
                let count = defaults.list.len();
                *self.inner.write() = defaults;
                info!(path = %file.display(), count, "loaded default data import cron templates");
                Ok(count)
            }
            Err(e) => {
                *self.inner.write() = Defaults::default();
                warn!(path = %file.display(), error = %e, "malformed default templates file");
                Err(Error::serialization_for_kind(
                    "DataImportCronTemplate",
                    format!("{}: {e}", file.display()),
                ))
            }
        }
    }

    /// Overwrite the schedule of every default template
    ///
    /// An empty schedule leaves the defaults untouched.
    pub fn pin_schedule(&self, schedule: &str) {
        if schedule.is_empty() {
            return;
        }
        let mut inner = self.inner.write();
        for tmpl in inner.list.iter_mut() {
            tmpl.spec.schedule = schedule.to_string();
        }
    }

    /// Merge the defaults with `caller` under the feature gate
    pub fn assemble(
        &self,
        caller: Option<&[DataImportCronTemplate]>,
        enabled: bool,
    ) -> Result<Option<Vec<DataImportCronTemplate>>> {
        let inner = self.inner.read();
        assemble_templates(&inner.list, &inner.names, caller, enabled)
    }

    /// Copy of the current defaults
    pub fn snapshot(&self) -> Vec<DataImportCronTemplate> {
        self.inner.read().list.clone()
    }

    /// Names of the current defaults
    pub fn names(&self) -> HashSet<String> {
        self.inner.read().names.clone()
    }

    /// Number of defaults
    pub fn len(&self) -> usize {
        self.inner.read().list.len()
    }

    /// True when no defaults are loaded
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
