use serde::{Deserialize, Serialize};

use pantry_core::generator::{
    GenerateRequest, GeneratedRecipe, GeneratorError, RecipeGenerator, build_prompt,
    clean_ingredients, parse_generated_recipe,
};

use crate::config::GeminiSettings;

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Serialize)]
struct GenerateContentRequest {
    contents: Vec<Content>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

#[derive(Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    error: Option<ErrorBody>,
}

/// Text of the first part of the first candidate.
fn reply_text(body: &str) -> Result<String, GeneratorError> {
    let resp: GenerateContentResponse = serde_json::from_str(body)
        .map_err(|e| GeneratorError::provider(format!("Unreadable Gemini response: {e}")))?;
    if let Some(err) = resp.error {
        return Err(GeneratorError::provider(err.message));
    }
    resp.candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .and_then(|c| c.parts.into_iter().next())
        .map(|p| p.text)
        .ok_or_else(|| GeneratorError::provider("Gemini returned no candidates"))
}

fn error_message(status: reqwest::StatusCode, body: &str) -> String {
    serde_json::from_str::<GenerateContentResponse>(body)
        .ok()
        .and_then(|r| r.error)
        .map_or_else(|| format!("Gemini API returned {status}"), |e| e.message)
}

pub struct GeminiClient {
    client: reqwest::Client,
    rt: tokio::runtime::Handle,
    api_key: String,
    endpoint: String,
}

impl GeminiClient {
    /// Fails with [`GeneratorError::MissingCredential`] when no key is set.
    pub fn new(settings: &GeminiSettings) -> Result<Self, GeneratorError> {
        let api_key = settings
            .api_key
            .clone()
            .ok_or(GeneratorError::MissingCredential)?;
        let client = reqwest::Client::builder()
            .user_agent(format!(
                "pantry-cli/{} (meal planner)",
                env!("CARGO_PKG_VERSION")
            ))
            .connect_timeout(std::time::Duration::from_secs(10))
            .build()
            .map_err(|e| GeneratorError::provider(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            rt: tokio::runtime::Handle::current(),
            api_key,
            endpoint: format!(
                "{}/v1beta/models/{}:generateContent",
                settings.base_url, settings.model
            ),
        })
    }

    pub async fn complete_async(&self, prompt: &str) -> Result<String, GeneratorError> {
        let body = GenerateContentRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: prompt.to_string(),
                }],
            }],
        };
        let resp = self
            .client
            .post(&self.endpoint)
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await
            .map_err(|e| GeneratorError::provider(format!("Failed to reach Gemini API: {e}")))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| GeneratorError::provider(format!("Failed to read Gemini response: {e}")))?;
        if !status.is_success() {
            return Err(GeneratorError::provider(error_message(status, &text)));
        }
        reply_text(&text)
    }

    /// Validate, prompt, call once, parse.
    pub async fn generate_async(
        &self,
        request: &GenerateRequest,
    ) -> Result<GeneratedRecipe, GeneratorError> {
        let ingredients = clean_ingredients(&request.ingredients);
        if ingredients.is_empty() {
            return Err(GeneratorError::EmptyIngredients);
        }
        let prompt = build_prompt(&ingredients, request.preferences.as_deref());
        let raw = self.complete_async(&prompt).await?;
        parse_generated_recipe(&raw).inspect_err(|e| {
            tracing::debug!("unusable generator response ({e}): {raw}");
        })
    }
}

// Blocks on the runtime handle; call from a blocking thread, never a runtime worker.
impl RecipeGenerator for GeminiClient {
    fn complete(&self, prompt: &str) -> Result<String, GeneratorError> {
        self.rt.block_on(self.complete_async(prompt))
    }
}
