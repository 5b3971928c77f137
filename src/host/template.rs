//! Template rendering.
//!
//! Only placeholder substitution is supported: `{{ name }}` is replaced by
//! the variable `name`. An unknown placeholder is an error, so a typo in a
//! template can never silently render an empty value into a unit file.

use std::collections::BTreeMap;
use std::fs;

use crate::error::{ReconcileError, Result};
use crate::types::TemplateSource;

/// Template id of the systemd unit override
pub const SERVICE_UNIT_TEMPLATE: &str = "postgresql.service";

/// Variables available to a template
pub type TemplateVars = BTreeMap<&'static str, String>;

const BUILTIN_SERVICE_UNIT: &str = "\
# Managed by pgreconcile. Local changes will be overwritten.
[Unit]
Description=PostgreSQL {{ version }} database server ({{ service_name }})
Documentation=https://www.postgresql.org/docs/{{ version }}/static/
After=syslog.target
After=network.target

[Service]
Type=notify
User=postgres
Group=postgres

Environment=PGDATA={{ data_dir }}
Environment=PGPORT={{ port }}
OOMScoreAdjust=-1000
Environment=PG_OOM_ADJUST_FILE=/proc/self/oom_score_adj
Environment=PG_OOM_ADJUST_VALUE=0

ExecStartPre={{ bin_dir }}/postgresql-{{ version }}-check-db-dir ${PGDATA}
ExecStart={{ bin_dir }}/postmaster -D ${PGDATA} -p ${PGPORT}
ExecReload=/bin/kill -HUP $MAINPID
KillMode=mixed
KillSignal=SIGINT
TimeoutSec=0

[Install]
WantedBy=multi-user.target
";

/// Renders templates by id.
pub trait TemplateRenderer {
    fn render(&self, template_id: &str, vars: &TemplateVars) -> Result<String>;
}

/// Renderer selected by the configured [`TemplateSource`].
#[derive(Debug, Clone)]
pub struct SourceRenderer {
    source: TemplateSource,
}

impl SourceRenderer {
    pub fn new(source: TemplateSource) -> Self {
        Self { source }
    }

    fn load(&self, template_id: &str) -> Result<String> {
        match &self.source {
            TemplateSource::Builtin => match template_id {
                SERVICE_UNIT_TEMPLATE => Ok(BUILTIN_SERVICE_UNIT.to_string()),
                other => Err(ReconcileError::config(format!(
                    "no builtin template named '{}'",
                    other
                ))),
            },
            TemplateSource::Directory(dir) => {
                let path = dir.join(template_id);
                fs::read_to_string(&path).map_err(|e| {
                    ReconcileError::config(format!(
                        "cannot read template {}: {}",
                        path.display(),
                        e
                    ))
                })
            }
        }
    }
}

impl TemplateRenderer for SourceRenderer {
    fn render(&self, template_id: &str, vars: &TemplateVars) -> Result<String> {
        let template = self.load(template_id)?;
        substitute(&template, vars)
            .map_err(|name| {
                ReconcileError::config(format!(
                    "template '{}' references unknown variable '{}'",
                    template_id, name
                ))
            })
    }
}

/// Replace every `{{ name }}` with its value. Returns the first unknown name on failure.
pub fn substitute(template: &str, vars: &TemplateVars) -> std::result::Result<String, String> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            // Unterminated braces are literal text
            out.push_str(&rest[start..]);
            return Ok(out);
        };
        let name = after[..end].trim();
        match vars.get(name) {
            Some(value) => out.push_str(value),
            None => return Err(name.to_string()),
        }
        rest = &after[end + 2..];
    }

    out.push_str(rest);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::tempdir;

    fn unit_vars() -> TemplateVars {
        let mut vars = TemplateVars::new();
        vars.insert("service_name", "postgresql-9.6".to_string());
        vars.insert("port", "5432".to_string());
        vars.insert("data_dir", "/var/lib/pgsql/9.6/data".to_string());
        vars.insert("version", "9.6".to_string());
        vars.insert("bin_dir", "/usr/pgsql-9.6/bin".to_string());
        vars
    }

    #[test]
    fn test_substitute_replaces_all_placeholders() {
        let out = substitute("a={{ port }} b={{port}} c", &unit_vars()).unwrap();
        assert_eq!(out, "a=5432 b=5432 c");
    }

    #[test]
    fn test_substitute_unknown_variable() {
        assert_eq!(
            substitute("{{ nope }}", &unit_vars()).unwrap_err(),
            "nope".to_string()
        );
    }

    #[test]
    fn test_substitute_unterminated_is_literal() {
        assert_eq!(substitute("x {{ port", &unit_vars()).unwrap(), "x {{ port");
    }

    #[test]
    fn test_builtin_service_unit() {
        let renderer = SourceRenderer::new(TemplateSource::Builtin);
        let unit = renderer.render(SERVICE_UNIT_TEMPLATE, &unit_vars()).unwrap();

        assert!(unit.contains("Environment=PGPORT=5432"));
        assert!(unit.contains("Environment=PGDATA=/var/lib/pgsql/9.6/data"));
        assert!(unit.contains("ExecStart=/usr/pgsql-9.6/bin/postmaster"));
        assert!(!unit.contains("{{"));
    }

    #[test]
    fn test_directory_source() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join(SERVICE_UNIT_TEMPLATE),
            "[Service]\nEnvironment=PGPORT={{ port }}\n",
        )
        .unwrap();

        let renderer = SourceRenderer::new(TemplateSource::Directory(PathBuf::from(dir.path())));
        let unit = renderer.render(SERVICE_UNIT_TEMPLATE, &unit_vars()).unwrap();
        assert_eq!(unit, "[Service]\nEnvironment=PGPORT=5432\n");
    }

    #[test]
    fn test_missing_template() {
        let renderer = SourceRenderer::new(TemplateSource::Builtin);
        assert!(renderer.render("pg_hba.conf", &unit_vars()).is_err());
    }
}
