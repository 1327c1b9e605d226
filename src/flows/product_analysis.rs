//! Product analysis: find a product, judge it against the profile, offer to
//! keep it in the product directory.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::conversation::ProductEntry;
use crate::error::FlowError;
use crate::flows::machine::{Progress, StepContext, StepMachine, StepOutcome, parse_yes_no};
use crate::flows::{FlowKind, FlowLocalState, FlowResult};
use crate::tools::ProductInfo;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductStep {
    CollectQuery,
    Search,
    Analyze,
    ConfirmAdd,
}

impl std::fmt::Display for ProductStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::CollectQuery => "collect_query",
            Self::Search => "search",
            Self::Analyze => "analyze",
            Self::ConfirmAdd => "confirm_add",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProductData {
    #[serde(default)]
    query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    candidate: Option<ProductInfo>,
    #[serde(default)]
    assessment: String,
}

pub type ProductProgress = Progress<ProductStep, ProductData>;

const QUERY_PROMPT: &str =
    "Which product should I look at? Tell me its name and brand, or send a photo of it.";

/// What this turn offers as a product query.
enum QueryInput {
    Query(String),
    /// A photo was sent but nothing could be read off it.
    Unreadable,
    Missing,
}

pub struct ProductAnalysis;

impl ProductAnalysis {
    fn missing(step: ProductStep, what: &str) -> FlowError {
        FlowError::MissingData {
            flow: FlowKind::ProductAnalysis,
            step: step.to_string(),
            missing: what.to_string(),
        }
    }

    /// A photo wins over text. `trigger_ok` lets the text of the turn that
    /// started the flow count as the query.
    async fn take_query(
        ctx: &mut StepContext<'_>,
        trigger_ok: bool,
    ) -> Result<QueryInput, FlowError> {
        if let Some(image) = ctx.cursor.take_image() {
            ctx.progress.partial("Reading the product from your photo…");
            return match ctx.tools.products.recognize(&image).await {
                Ok(query) => {
                    debug!(query = %query, "Product recognized from photo");
                    Ok(QueryInput::Query(query))
                }
                Err(e) if e.is_recoverable() => Ok(QueryInput::Unreadable),
                Err(e) => Err(e.into()),
            };
        }
        let text = if trigger_ok {
            ctx.cursor.request_text()
        } else {
            ctx.cursor.reply_text()
        };
        Ok(text.map_or(QueryInput::Missing, QueryInput::Query))
    }
}

fn unreadable_photo<S>() -> StepOutcome<S> {
    StepOutcome::retry(format!("I couldn't make out the product in that photo. {QUERY_PROMPT}"))
}

#[async_trait]
impl StepMachine for ProductAnalysis {
    type Step = ProductStep;
    type Data = ProductData;

    const KIND: FlowKind = FlowKind::ProductAnalysis;
    const INITIAL: ProductStep = ProductStep::CollectQuery;

    fn project(local: FlowLocalState) -> Result<ProductProgress, FlowError> {
        match local {
            FlowLocalState::ProductAnalysis(progress) => Ok(progress),
            other => Err(FlowError::StateMismatch {
                expected: Self::KIND,
                found: other.kind(),
            }),
        }
    }

    fn embed(progress: ProductProgress) -> FlowLocalState {
        FlowLocalState::ProductAnalysis(progress)
    }

    async fn run_step(
        &self,
        step: ProductStep,
        data: &mut ProductData,
        ctx: &mut StepContext<'_>,
    ) -> Result<StepOutcome<ProductStep>, FlowError> {
        match step {
            // The trigger text usually names the product already.
            ProductStep::CollectQuery => match Self::take_query(ctx, true).await? {
                QueryInput::Query(query) => {
                    data.query = query;
                    Ok(StepOutcome::advance(ProductStep::Search))
                }
                QueryInput::Unreadable => Ok(unreadable_photo()),
                QueryInput::Missing => Ok(ctx.cursor.request(QUERY_PROMPT)),
            },

            ProductStep::Search => {
                if data.query.is_empty() {
                    match Self::take_query(ctx, false).await? {
                        QueryInput::Query(query) => data.query = query,
                        QueryInput::Unreadable => return Ok(unreadable_photo()),
                        QueryInput::Missing => return Ok(ctx.cursor.request(QUERY_PROMPT)),
                    }
                }
                ctx.progress.partial("Searching for the product…");
                let found = match ctx.tools.products.search(&data.query).await {
                    Ok(found) => found,
                    Err(e) if e.is_recoverable() => Vec::new(),
                    Err(e) => return Err(e.into()),
                };
                match found.into_iter().next() {
                    Some(product) => {
                        info!(query = %data.query, product = %product.name, "Product found");
                        data.candidate = Some(product);
                        Ok(StepOutcome::advance(ProductStep::Analyze))
                    }
                    None => {
                        let query = std::mem::take(&mut data.query);
                        Ok(StepOutcome::retry(format!(
                            "I couldn't find \"{query}\". Could you describe it more clearly, \
                             with the brand and full product name?"
                        )))
                    }
                }
            }

            ProductStep::Analyze => {
                let product = data
                    .candidate
                    .as_ref()
                    .ok_or_else(|| Self::missing(step, "product"))?;
                ctx.progress.partial("Checking how it suits you…");
                data.assessment = ctx.tools.feedback.product_fit(product, ctx.profile).await?;
                Ok(StepOutcome::advance(ProductStep::ConfirmAdd))
            }

            ProductStep::ConfirmAdd => {
                let product = data
                    .candidate
                    .as_ref()
                    .ok_or_else(|| Self::missing(step, "product"))?;
                let question = if ctx.directory.get(&product.name).is_some() {
                    format!(
                        "{}\n\n{} is already in your products. Should I update it? (yes/no)",
                        data.assessment, product.name
                    )
                } else {
                    format!(
                        "{}\n\nShould I add {} to your products? (yes/no)",
                        data.assessment, product.name
                    )
                };
                let Some(answer) = ctx.cursor.reply_text() else {
                    return Ok(ctx.cursor.request(question));
                };
                match parse_yes_no(&answer) {
                    Some(true) => {
                        let entry = ProductEntry {
                            name: product.name.clone(),
                            brand: product.brand.clone(),
                            category: product.category.clone(),
                            ingredients: product.ingredients.clone(),
                            assessment: data.assessment.clone(),
                            added_at: Utc::now(),
                        };
                        let reply = format!("Added {} to your products.", entry.name);
                        Ok(StepOutcome::Done(FlowResult::reply(reply).with_product(entry)))
                    }
                    Some(false) => Ok(StepOutcome::Done(FlowResult::reply(format!(
                        "Okay, I won't add {}.",
                        product.name
                    )))),
                    None => Ok(StepOutcome::retry(format!(
                        "Please answer yes or no: should I add {} to your products?",
                        product.name
                    ))),
                }
            }
        }
    }
}
