//! OSB catalog projection from stored templates.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use stencil_state::{ResourceStore, Resource, Template, TypedStore};

use crate::annotations;
use crate::error::BrokerResult;

pub const DEFAULT_PLAN_NAME: &str = "default";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Service {
    pub id: String,
    pub name: String,
    pub description: String,
    pub bindable: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
    pub plans: Vec<Plan>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub id: String,
    pub name: String,
    pub description: String,
    pub free: bool,
    pub schemas: Value,
}

/// Whether a template may be bound. Only an explicit `"false"` opts out.
pub fn is_bindable(template: &Template) -> bool {
    template.metadata.annotation(annotations::BINDABLE) != Some("false")
}

/// JSON schema for the instance-create parameters.
pub fn parameter_schema(template: &Template) -> Value {
    let mut properties = serde_json::Map::new();
    let mut required = Vec::new();
    for param in &template.parameters {
        let title = if param.display_name.is_empty() {
            &param.name
        } else {
            &param.display_name
        };
        let mut property = json!({
            "type": "string",
            "title": title,
        });
        if !param.description.is_empty() {
            property["description"] = json!(param.description);
        }
        if !param.value.is_empty() {
            property["default"] = json!(param.value);
        }
        if param.required && param.value.is_empty() {
            required.push(param.name.clone());
        }
        properties.insert(param.name.clone(), property);
    }
    json!({
        "$schema": "http://json-schema.org/draft-04/schema",
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

/// Project one template into a catalog service.
pub fn service_for(template: &Template) -> Service {
    let meta = &template.metadata;
    let description = meta
        .annotation(annotations::DESCRIPTION)
        .filter(|d| !d.is_empty())
        .unwrap_or("No description provided.")
        .to_string();
    let tags = meta
        .annotation(annotations::TAGS)
        .map(|t| {
            t.split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    let metadata = [
        ("displayName", annotations::DISPLAY_NAME),
        ("imageUrl", annotations::ICON_CLASS),
        ("longDescription", annotations::LONG_DESCRIPTION),
        ("providerDisplayName", annotations::PROVIDER_DISPLAY_NAME),
        ("documentationUrl", annotations::DOCUMENTATION_URL),
        ("supportUrl", annotations::SUPPORT_URL),
    ]
    .into_iter()
    .filter_map(|(field, key)| meta.annotation(key).map(|v| (field.to_string(), v.to_string())))
    .collect();

    Service {
        id: meta.uid.clone(),
        name: meta.name.clone(),
        description,
        bindable: is_bindable(template),
        tags,
        metadata,
        plans: vec![Plan {
            id: meta.uid.clone(),
            name: DEFAULT_PLAN_NAME.to_string(),
            description: "Default plan".to_string(),
            free: true,
            schemas: json!({
                "service_instance": {
                    "create": { "parameters": parameter_schema(template) }
                }
            }),
        }],
    }
}

/// Reads templates from the configured namespaces.
#[derive(Clone)]
pub struct CatalogProjector {
    store: Arc<dyn ResourceStore>,
    namespaces: Vec<String>,
}

impl std::fmt::Debug for CatalogProjector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CatalogProjector")
            .field("namespaces", &self.namespaces)
            .finish_non_exhaustive()
    }
}

impl CatalogProjector {
    pub fn new(store: Arc<dyn ResourceStore>, namespaces: Vec<String>) -> Self {
        Self { store, namespaces }
    }

    pub fn templates(&self) -> BrokerResult<Vec<Template>> {
        let mut templates = Vec::new();
        for ns in &self.namespaces {
            templates.extend(self.store.list_typed::<Template>(Some(ns))?);
        }
        Ok(templates)
    }

    /// The full catalog, sorted by service name.
    pub fn catalog(&self) -> BrokerResult<Vec<Service>> {
        let mut services: Vec<Service> = self.templates()?.iter().map(service_for).collect();
        services.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        Ok(services)
    }

    /// The template whose uid is `service_id`, if any.
    pub fn find_template(&self, service_id: &str) -> BrokerResult<Option<Template>> {
        Ok(self
            .templates()?
            .into_iter()
            .find(|t| t.metadata().uid == service_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stencil_state::{ObjectMeta, StateStore, TemplateParameter};

    fn template(ns: &str, name: &str) -> Template {
        Template {
            metadata: ObjectMeta::named(ns, name),
            message: String::new(),
            objects: vec![],
            parameters: vec![
                TemplateParameter {
                    name: "DATABASE_USER".to_string(),
                    display_name: "Database user".to_string(),
                    required: true,
                    ..Default::default()
                },
                TemplateParameter {
                    name: "DATABASE_NAME".to_string(),
                    value: "app".to_string(),
                    required: true,
                    ..Default::default()
                },
            ],
        }
    }

    #[test]
    fn service_projection() {
        let mut t = template("stencil", "postgresql");
        t.metadata.uid = "uid-1".to_string();
        t.metadata.annotations.extend([
            ("description".to_string(), "PostgreSQL database".to_string()),
            ("tags".to_string(), "database, sql,".to_string()),
            ("stencil.dev/display-name".to_string(), "PostgreSQL".to_string()),
        ]);

        let svc = service_for(&t);
        assert_eq!(svc.id, "uid-1");
        assert_eq!(svc.description, "PostgreSQL database");
        assert_eq!(svc.tags, vec!["database", "sql"]);
        assert_eq!(svc.metadata["displayName"], "PostgreSQL");
        assert!(svc.bindable);
        assert_eq!(svc.plans[0].id, "uid-1");
        assert_eq!(svc.plans[0].name, "default");

        let schema = &svc.plans[0].schemas["service_instance"]["create"]["parameters"];
        assert_eq!(schema["required"], json!(["DATABASE_USER"]));
        assert_eq!(schema["properties"]["DATABASE_NAME"]["default"], "app");
        assert_eq!(schema["properties"]["DATABASE_USER"]["title"], "Database user");
    }

    #[test]
    fn bindable_and_description_defaults() {
        let mut t = template("stencil", "x");
        assert_eq!(service_for(&t).description, "No description provided.");
        t.metadata
            .annotations
            .insert(annotations::BINDABLE.to_string(), "false".to_string());
        assert!(!is_bindable(&t));
    }

    #[test]
    fn catalog_only_reads_configured_namespaces() {
        let store = Arc::new(StateStore::open_in_memory().unwrap());
        let b = store.create_typed(&template("stencil", "b")).unwrap();
        store.create_typed(&template("stencil", "a")).unwrap();
        store.create_typed(&template("elsewhere", "c")).unwrap();

        let projector = CatalogProjector::new(store, vec!["stencil".to_string()]);
        let names: Vec<_> = projector.catalog().unwrap().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["a", "b"]);

        let found = projector.find_template(&b.metadata.uid).unwrap().unwrap();
        assert_eq!(found.metadata.name, "b");
        assert!(projector.find_template("missing").unwrap().is_none());
    }
}
