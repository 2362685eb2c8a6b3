use crate::catalog::CoinDetails;
use crate::config::Settings;
use crate::error::RecommendationError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

const SYSTEM_PROMPT: &str =
    "You are a cryptocurrency investment advisor. Always respond with valid JSON only, no additional text.";
const TEMPERATURE: f32 = 0.5;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recommendation {
    pub coin_id: String,
    pub decision: bool,
    pub rationale: String,
}

/// The model's verdict before it is attached to a coin.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Answer {
    pub should_buy: bool,
    pub explanation: String,
}

#[async_trait]
pub trait RecommendationSource: Send + Sync {
    async fn recommend(&self, details: &CoinDetails) -> Result<Recommendation, RecommendationError>;
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    response_format: ResponseFormat,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    content: Option<String>,
}

#[derive(Clone, Debug)]
pub struct OpenAiClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

impl OpenAiClient {
    pub fn new(settings: &Settings) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(settings.http_timeout * 3)
            .build()?;
        Ok(Self {
            http,
            base_url: settings.openai_base_url.clone(),
            model: settings.openai_model.clone(),
            api_key: settings.openai_api_key.clone(),
        })
    }

    pub fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    async fn complete(&self, api_key: &str, prompt: &str) -> Result<String, RecommendationError> {
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage { role: "system", content: SYSTEM_PROMPT },
                ChatMessage { role: "user", content: prompt },
            ],
            temperature: TEMPERATURE,
            response_format: ResponseFormat { kind: "json_object" },
        };

        let resp = self
            .http
            .post(self.completions_url())
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| RecommendationError::Transport(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(map_status(status.as_u16(), error_message(&text)));
        }

        let parsed: ChatResponse = resp
            .json()
            .await
            .map_err(|e| RecommendationError::Unparseable(e.to_string()))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or(RecommendationError::EmptyAnswer)
    }
}

#[async_trait]
impl RecommendationSource for OpenAiClient {
    async fn recommend(&self, details: &CoinDetails) -> Result<Recommendation, RecommendationError> {
        let prompt = build_prompt(details)?;
        let api_key = self
            .api_key
            .as_deref()
            .ok_or(RecommendationError::MissingApiKey)?;

        info!("Requesting recommendation for {}", details.id);
        let content = self.complete(api_key, &prompt).await?;
        debug!("Recommendation content for {}: {}", details.id, content);

        let answer = parse_answer(&content).inspect_err(|e| {
            warn!("Could not parse recommendation for {}: {}", details.id, e);
        })?;
        Ok(Recommendation {
            coin_id: details.id.clone(),
            decision: answer.should_buy,
            rationale: answer.explanation,
        })
    }
}

pub fn map_status(status: u16, message: String) -> RecommendationError {
    match status {
        401 => RecommendationError::InvalidApiKey,
        429 => RecommendationError::RateLimited,
        500..=599 => RecommendationError::Upstream { status },
        _ => RecommendationError::Status { status, message },
    }
}

fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.pointer("/error/message").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| "Unknown error".to_string())
}

/// Renders the advisor prompt. Price, market cap, and volume are required.
pub fn build_prompt(details: &CoinDetails) -> Result<String, RecommendationError> {
    let market = details
        .market_data
        .as_ref()
        .ok_or(RecommendationError::MissingMarketData)?;
    let (Some(price), Some(cap), Some(volume)) = (
        market.current_price.usd,
        market.market_cap.usd,
        market.total_volume.usd,
    ) else {
        return Err(RecommendationError::MissingMarketData);
    };

    let change_30d = market.price_change_percentage_30d_in_currency.usd.unwrap_or(0.0);
    let change_60d = market.price_change_percentage_60d_in_currency.usd.unwrap_or(0.0);
    let change_200d = market.price_change_percentage_200d_in_currency.usd.unwrap_or(0.0);

    Ok(format!(
        "You are a cryptocurrency expert. Based on the following data for \"{name}\" ({symbol}), \
provide a recommendation on whether to buy this cryptocurrency or not.

Coin Data:
- Name: {name}
- Current Price (USD): ${price}
- Market Cap (USD): ${cap}
- 24h Trading Volume (USD): ${volume}
- Price change 30 days: {change_30d:.2}%
- Price change 60 days: {change_60d:.2}%
- Price change 200 days: {change_200d:.2}%

Analyze these metrics and provide a professional recommendation.

IMPORTANT: You MUST respond ONLY with valid JSON in this exact format:
{{
  \"shouldBuy\": true,
  \"explanation\": \"Your explanation (2-3 sentences)\"
}}

Do NOT include any text before or after the JSON. Only return the JSON object.",
        name = details.name,
        symbol = details.symbol,
        price = group_thousands(price),
        cap = group_thousands(cap),
        volume = group_thousands(volume),
    ))
}

/// `1234567.891` -> `1,234,567.89`
fn group_thousands(value: f64) -> String {
    let formatted = format!("{:.2}", value.abs());
    let (int_part, frac_part) = formatted.split_once('.').unwrap_or((&formatted, "00"));
    let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3);
    for (i, ch) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    let frac = frac_part.trim_end_matches('0');
    let sign = if value < 0.0 { "-" } else { "" };
    if frac.is_empty() {
        format!("{}{}", sign, grouped)
    } else {
        format!("{}{}.{}", sign, grouped, frac)
    }
}

/// Extracts the verdict from a model reply, tolerating code fences, prose around
/// the JSON, and a stringly-typed `shouldBuy`.
pub fn parse_answer(content: &str) -> Result<Answer, RecommendationError> {
    let cleaned = strip_code_fences(content);

    if let Some(answer) = serde_json::from_str::<Value>(&cleaned).ok().and_then(|v| answer_from_json(&v)) {
        return Ok(answer);
    }

    if let (Some(start), Some(end)) = (cleaned.find('{'), cleaned.rfind('}')) {
        if start < end {
            if let Some(answer) = serde_json::from_str::<Value>(&cleaned[start..=end])
                .ok()
                .and_then(|v| answer_from_json(&v))
            {
                return Ok(answer);
            }
        }
    }

    match (scan_should_buy(content), scan_explanation(content)) {
        (should_buy, Some(explanation)) => Ok(Answer {
            should_buy: should_buy.unwrap_or(false),
            explanation,
        }),
        _ => {
            let preview: String = content.chars().take(200).collect();
            Err(RecommendationError::Unparseable(preview))
        }
    }
}

fn strip_code_fences(content: &str) -> String {
    content
        .trim()
        .replace("```json", "")
        .replace("```", "")
        .trim()
        .to_string()
}

fn answer_from_json(value: &Value) -> Option<Answer> {
    let explanation = value
        .get("explanation")
        .and_then(Value::as_str)
        .filter(|e| !e.is_empty())?
        .to_string();
    let should_buy = match value.get("shouldBuy") {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
        _ => false,
    };
    Some(Answer { should_buy, explanation })
}

/// Byte offset just past `key` and any quote, colon, or whitespace that follows it.
fn value_start(haystack: &str, key: &str) -> Option<usize> {
    let lower = haystack.to_ascii_lowercase();
    let at = lower.find(&key.to_ascii_lowercase())? + key.len();
    let skipped = haystack[at..]
        .char_indices()
        .find(|(_, c)| !(c.is_whitespace() || *c == ':' || *c == '"'))
        .map_or(haystack.len() - at, |(i, _)| i);
    Some(at + skipped)
}

fn scan_should_buy(content: &str) -> Option<bool> {
    let start = value_start(content, "shouldBuy")?;
    let rest = content[start..].trim_start_matches('\'').to_ascii_lowercase();
    if rest.starts_with("true") {
        Some(true)
    } else if rest.starts_with("false") {
        Some(false)
    } else {
        None
    }
}

fn scan_explanation(content: &str) -> Option<String> {
    let key_end = content.find("explanation")? + "explanation".len();
    let rest = content[key_end..].trim_start_matches(|c: char| c == '"' || c == ':' || c.is_whitespace());
    // Double quotes were trimmed above; single-quoted values keep their opener.
    let (body, close) = match rest.strip_prefix('\'') {
        Some(body) => (body, '\''),
        None => (rest, '"'),
    };
    let end = body.find(close)?;
    let explanation = body[..end].trim();
    (!explanation.is_empty()).then(|| explanation.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CurrencyPrices, MarketData, UsdAmount};

    fn details(with_volume: bool) -> CoinDetails {
        CoinDetails {
            id: "bitcoin".to_string(),
            symbol: "btc".to_string(),
            name: "Bitcoin".to_string(),
            image: Default::default(),
            market_data: Some(MarketData {
                current_price: CurrencyPrices { usd: Some(50000.5), eur: None, ils: None },
                market_cap: UsdAmount { usd: Some(980_000_000_000.0) },
                total_volume: UsdAmount { usd: with_volume.then_some(21_000_000.0) },
                price_change_percentage_30d_in_currency: UsdAmount { usd: Some(4.5) },
                ..Default::default()
            }),
        }
    }

    #[test]
    fn test_prompt_contains_formatted_metrics() {
        let prompt = build_prompt(&details(true)).unwrap();
        assert!(prompt.contains("\"Bitcoin\" (btc)"));
        assert!(prompt.contains("Current Price (USD): $50,000.5"));
        assert!(prompt.contains("Market Cap (USD): $980,000,000,000"));
        assert!(prompt.contains("Price change 30 days: 4.50%"));
        assert!(prompt.contains("Price change 200 days: 0.00%"));
        assert!(prompt.contains("\"shouldBuy\": true"));
    }

    #[test]
    fn test_prompt_requires_market_data() {
        assert!(matches!(
            build_prompt(&details(false)),
            Err(RecommendationError::MissingMarketData)
        ));
        let mut bare = details(true);
        bare.market_data = None;
        assert!(matches!(build_prompt(&bare), Err(RecommendationError::MissingMarketData)));
    }

    #[test]
    fn test_group_thousands() {
        assert_eq!(group_thousands(0.0), "0");
        assert_eq!(group_thousands(999.0), "999");
        assert_eq!(group_thousands(1234567.891), "1,234,567.89");
        assert_eq!(group_thousands(-1500.25), "-1,500.25");
    }

    #[test]
    fn test_parse_plain_json() {
        let answer = parse_answer(r#"{"shouldBuy": true, "explanation": "Strong momentum."}"#).unwrap();
        assert_eq!(answer, Answer { should_buy: true, explanation: "Strong momentum.".to_string() });
    }

    #[test]
    fn test_parse_fenced_and_wrapped_json() {
        let fenced = "```json\n{\"shouldBuy\": false, \"explanation\": \"Overheated.\"}\n```";
        assert!(!parse_answer(fenced).unwrap().should_buy);

        let wrapped = "Sure! Here you go: {\"shouldBuy\": \"true\", \"explanation\": \"Cheap.\"} Hope it helps.";
        let answer = parse_answer(wrapped).unwrap();
        assert!(answer.should_buy);
        assert_eq!(answer.explanation, "Cheap.");
    }

    #[test]
    fn test_parse_falls_back_to_text_scan() {
        let broken = "shouldBuy: TRUE, \"explanation\": \"Volume is rising\" (truncated";
        let answer = parse_answer(broken).unwrap();
        assert!(answer.should_buy);
        assert_eq!(answer.explanation, "Volume is rising");

        let single_quoted = "{shouldBuy: false, explanation: 'Too volatile'";
        let answer = parse_answer(single_quoted).unwrap();
        assert!(!answer.should_buy);
        assert_eq!(answer.explanation, "Too volatile");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(
            parse_answer("I cannot help with that."),
            Err(RecommendationError::Unparseable(_))
        ));
        assert!(matches!(
            parse_answer(r#"{"shouldBuy": true}"#),
            Err(RecommendationError::Unparseable(_))
        ));
    }

    #[test]
    fn test_status_mapping() {
        assert!(matches!(map_status(401, String::new()), RecommendationError::InvalidApiKey));
        assert!(matches!(map_status(429, String::new()), RecommendationError::RateLimited));
        assert!(matches!(map_status(503, String::new()), RecommendationError::Upstream { status: 503 }));
        let err = map_status(400, error_message(r#"{"error":{"message":"bad model"}}"#));
        assert_eq!(err.to_string(), "API error: 400 - bad model");
        assert_eq!(error_message("not json"), "Unknown error");
    }

    #[tokio::test]
    async fn test_missing_api_key_short_circuits() {
        let mut settings = Settings::from_env();
        settings.openai_api_key = None;
        settings.openai_base_url = "http://127.0.0.1:9".to_string();
        let client = OpenAiClient::new(&settings).unwrap();
        assert_eq!(client.completions_url(), "http://127.0.0.1:9/chat/completions");
        let err = client.recommend(&details(true)).await.unwrap_err();
        assert!(matches!(err, RecommendationError::MissingApiKey));
    }
}
