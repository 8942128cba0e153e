use async_trait::async_trait;
use serde::Deserialize;
use serde_yaml::Value;
use tracing::info;

use super::{decode, scalar_text, Action, ActionError, ActionRegistry};
use crate::context::ExecContext;
use crate::paths;

const ACTION: &str = "stage.set";

pub fn register(actions: &mut ActionRegistry) {
    actions.register(ACTION, build);
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StageConfig {
    #[serde(deserialize_with = "stage_id")]
    pub id: String,
}

fn stage_id<'de, D: serde::Deserializer<'de>>(de: D) -> Result<String, D::Error> {
    let value = Value::deserialize(de)?;
    scalar_text(&value).ok_or_else(|| serde::de::Error::custom("stage id must be a string or number"))
}

/// Records a new provisioning stage in the state directory.
#[derive(Debug)]
pub struct StageSet {
    pub config: StageConfig,
}

fn build(_ctx: &ExecContext, value: &Value) -> Result<Box<dyn Action>, ActionError> {
    let config = match scalar_text(value) {
        Some(id) => StageConfig { id },
        None => decode(ACTION, value)?,
    };
    Ok(Box::new(StageSet { config }))
}

#[async_trait]
impl Action for StageSet {
    fn validate(&self) -> Result<(), ActionError> {
        if self.config.id.is_empty() {
            return Err(ActionError::invalid(ACTION, "stage id is required"));
        }
        paths::validate_stage_id(&self.config.id).map_err(|e| ActionError::invalid(ACTION, e.to_string()))
    }

    async fn run(&self, ctx: &ExecContext) -> Result<(), ActionError> {
        info!(stage = %self.config.id, "setting stage");
        let record = ctx
            .stage_store()
            .set(&self.config.id)
            .map_err(|e| ActionError::failed(ACTION, e.to_string()))?;
        info!(stage = %record.id, started_at = %record.started_at, "stage recorded");
        Ok(())
    }
}
