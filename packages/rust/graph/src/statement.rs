//! The link statement written for one ledger row.

use paperlink_shared::{GraphProperties, PaperLinkError, Provenance, Result, SearchHit};
use serde_json::{Value, json};

/// One reference sub-statement (property id and string value).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub property: String,
    pub value: String,
}

/// "Entity `target` has companion code at `value`", with its references.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkStatement {
    /// Ledger key the statement was built from.
    pub arxiv_id: String,
    /// Resolved entity id, e.g. `Q12345`.
    pub target: String,
    pub property: String,
    /// Repository URL.
    pub value: String,
    pub references: Vec<Reference>,
}

impl LinkStatement {
    /// Build the statement for a resolved hit.
    ///
    /// Fails with a validation error if the hit has no identifier, no
    /// repository URL or no reference-page URL.
    pub fn for_hit(hit: &SearchHit, properties: &GraphProperties) -> Result<Self> {
        let missing = |field: &str| {
            PaperLinkError::validation(format!("arXiv {} has no {field}", hit.arxiv_id))
        };
        let target = hit.qid.clone().ok_or_else(|| missing("resolved identifier"))?;
        let value = non_empty(&hit.repo_url).ok_or_else(|| missing("repository URL"))?;
        let reference_url =
            non_empty(&hit.reference_url).ok_or_else(|| missing("reference URL"))?;

        Ok(Self {
            arxiv_id: hit.arxiv_id.clone(),
            target,
            property: properties.repository.clone(),
            value,
            references: vec![
                Reference {
                    property: properties.reference_url.clone(),
                    value: reference_url,
                },
                Reference {
                    property: properties.provenance.clone(),
                    value: hit.provenance().label().to_string(),
                },
            ],
        })
    }

    /// Provenance label carried in the references, if any.
    pub fn provenance_label(&self) -> Option<&str> {
        let labels = [
            Provenance::Publication,
            Provenance::RepositoryReadme,
            Provenance::Unknown,
        ];
        self.references
            .iter()
            .map(|r| r.value.as_str())
            .find(|v| labels.iter().any(|p| p.label() == *v))
    }

    /// `wbeditentity` payload: drop every existing claim on the property and
    /// add this one.
    pub fn edit_payload(&self, existing_claim_ids: &[String]) -> Value {
        let mut claims: Vec<Value> = existing_claim_ids
            .iter()
            .map(|id| json!({ "id": id, "remove": "" }))
            .collect();

        let mut snaks = serde_json::Map::new();
        for reference in &self.references {
            snaks.insert(
                reference.property.clone(),
                json!([string_snak(&reference.property, &reference.value)]),
            );
        }
        let order: Vec<&str> = self.references.iter().map(|r| r.property.as_str()).collect();

        claims.push(json!({
            "mainsnak": string_snak(&self.property, &self.value),
            "type": "statement",
            "rank": "normal",
            "references": [{ "snaks": snaks, "snaks-order": order }],
        }));

        json!({ "claims": claims })
    }
}

fn string_snak(property: &str, value: &str) -> Value {
    json!({
        "snaktype": "value",
        "property": property,
        "datavalue": { "value": value, "type": "string" },
    })
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}
