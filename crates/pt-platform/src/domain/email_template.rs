use serde::{Deserialize, Serialize};

use super::{AuditStamps, DomainError, Entity};

pub const MIN_TEMPLATE_LENGTH: usize = 20;

/// Email body template, keyed by a caller-chosen id (e.g. `welcome`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailTemplate {
    pub id: String,
    pub template: String,
    #[serde(flatten)]
    pub audit: AuditStamps,
}

impl EmailTemplate {
    pub fn new(id: impl Into<String>, template: impl Into<String>) -> Result<Self, DomainError> {
        let template = template.into();
        check_length(&template)?;
        Ok(Self {
            id: id.into(),
            template,
            audit: AuditStamps::default(),
        })
    }

    pub fn set_template(&mut self, template: impl Into<String>) -> Result<(), DomainError> {
        let template = template.into();
        check_length(&template)?;
        self.template = template;
        Ok(())
    }
}

fn check_length(template: &str) -> Result<(), DomainError> {
    let actual = template.chars().count();
    if actual < MIN_TEMPLATE_LENGTH {
        return Err(DomainError::TemplateTooShort {
            min: MIN_TEMPLATE_LENGTH,
            actual,
        });
    }
    Ok(())
}

impl Entity for EmailTemplate {
    const ENTITY_TYPE: &'static str = "EmailTemplate";

    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }

    fn audit(&self) -> &AuditStamps {
        &self.audit
    }

    fn audit_mut(&mut self) -> &mut AuditStamps {
        &mut self.audit
    }
}
