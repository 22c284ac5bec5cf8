//! Every action the flow nodes can perform, as one closed sum type.
//!
//! Flow messages arrive as `{ action, payload }`; [`Operation::from_action`]
//! decodes them into a typed variant once, and everything downstream matches
//! exhaustively.

use chrono::{NaiveDate, NaiveTime};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use wger_http::RequestSpec;

#[derive(Debug, thiserror::Error)]
pub enum OperationError {
    #[error("unknown action '{0}'")]
    UnknownAction(String),
    #[error("invalid payload for '{action}': {source}")]
    InvalidPayload {
        action: String,
        #[source]
        source: serde_json::Error,
    },
}

// ============================================================================
// Payloads
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Page {
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl Page {
    fn apply(&self, mut spec: RequestSpec) -> RequestSpec {
        if let Some(limit) = self.limit {
            spec = spec.query("limit", limit);
        }
        if let Some(offset) = self.offset {
            spec = spec.query("offset", offset);
        }
        spec
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewWorkout {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkoutPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewNutritionPlan {
    pub description: String,
    #[serde(default)]
    pub only_logging: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewMeal {
    pub plan: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<NaiveTime>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewWeightEntry {
    pub date: NaiveDate,
    pub weight: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WeightPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
}

// ============================================================================
// Operations
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    Workout(WorkoutOp),
    Nutrition(NutritionOp),
    Weight(WeightOp),
    Exercise(ExerciseOp),
}

#[derive(Debug, Clone, PartialEq)]
pub enum WorkoutOp {
    List { page: Page },
    Get { id: u64 },
    Create(NewWorkout),
    Update { id: u64, patch: WorkoutPatch },
    Delete { id: u64 },
}

#[derive(Debug, Clone, PartialEq)]
pub enum NutritionOp {
    ListPlans { page: Page },
    GetPlan { id: u64 },
    CreatePlan(NewNutritionPlan),
    DeletePlan { id: u64 },
    ListMeals { plan: Option<u64>, page: Page },
    CreateMeal(NewMeal),
    DeleteMeal { id: u64 },
}

#[derive(Debug, Clone, PartialEq)]
pub enum WeightOp {
    List { since: Option<NaiveDate>, page: Page },
    Create(NewWeightEntry),
    Update { id: u64, patch: WeightPatch },
    Delete { id: u64 },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExerciseOp {
    Search { term: String, language: String },
    Get { id: u64 },
}

const WORKOUT: &str = "/api/v2/workout/";
const NUTRITION_PLAN: &str = "/api/v2/nutritionplan/";
const MEAL: &str = "/api/v2/meal/";
const WEIGHT_ENTRY: &str = "/api/v2/weightentry/";

fn item(collection: &str, id: u64) -> String {
    format!("{}{}/", collection, id)
}

fn body<T: Serialize>(payload: &T) -> serde_json::Result<Value> {
    serde_json::to_value(payload)
}

impl Operation {
    /// Action name as used by the flow nodes.
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Workout(op) => match op {
                WorkoutOp::List { .. } => "listWorkouts",
                WorkoutOp::Get { .. } => "getWorkout",
                WorkoutOp::Create(_) => "createWorkout",
                WorkoutOp::Update { .. } => "updateWorkout",
                WorkoutOp::Delete { .. } => "deleteWorkout",
            },
            Operation::Nutrition(op) => match op {
                NutritionOp::ListPlans { .. } => "listNutritionPlans",
                NutritionOp::GetPlan { .. } => "getNutritionPlan",
                NutritionOp::CreatePlan(_) => "createNutritionPlan",
                NutritionOp::DeletePlan { .. } => "deleteNutritionPlan",
                NutritionOp::ListMeals { .. } => "listMeals",
                NutritionOp::CreateMeal(_) => "createMeal",
                NutritionOp::DeleteMeal { .. } => "deleteMeal",
            },
            Operation::Weight(op) => match op {
                WeightOp::List { .. } => "listWeightEntries",
                WeightOp::Create(_) => "createWeightEntry",
                WeightOp::Update { .. } => "updateWeightEntry",
                WeightOp::Delete { .. } => "deleteWeightEntry",
            },
            Operation::Exercise(op) => match op {
                ExerciseOp::Search { .. } => "searchExercises",
                ExerciseOp::Get { .. } => "getExercise",
            },
        }
    }

    /// Whether this changes the weight log (and so stale statistics).
    pub fn mutates_weight_log(&self) -> bool {
        matches!(
            self,
            Operation::Weight(WeightOp::Create(_) | WeightOp::Update { .. } | WeightOp::Delete { .. })
        )
    }

    /// HTTP verb, endpoint, query and JSON body for this operation.
    pub fn request(&self) -> serde_json::Result<RequestSpec> {
        let spec = match self {
            Operation::Workout(op) => match op {
                WorkoutOp::List { page } => page.apply(RequestSpec::get(WORKOUT)),
                WorkoutOp::Get { id } => RequestSpec::get(item(WORKOUT, *id)),
                WorkoutOp::Create(new) => RequestSpec::new(Method::POST, WORKOUT).json(body(new)?),
                WorkoutOp::Update { id, patch } => {
                    RequestSpec::new(Method::PATCH, item(WORKOUT, *id)).json(body(patch)?)
                }
                WorkoutOp::Delete { id } => RequestSpec::new(Method::DELETE, item(WORKOUT, *id)),
            },
            Operation::Nutrition(op) => match op {
                NutritionOp::ListPlans { page } => page.apply(RequestSpec::get(NUTRITION_PLAN)),
                NutritionOp::GetPlan { id } => RequestSpec::get(item(NUTRITION_PLAN, *id)),
                NutritionOp::CreatePlan(new) => {
                    RequestSpec::new(Method::POST, NUTRITION_PLAN).json(body(new)?)
                }
                NutritionOp::DeletePlan { id } => {
                    RequestSpec::new(Method::DELETE, item(NUTRITION_PLAN, *id))
                }
                NutritionOp::ListMeals { plan, page } => {
                    let mut spec = page.apply(RequestSpec::get(MEAL));
                    if let Some(plan) = plan {
                        spec = spec.query("plan", plan);
                    }
                    spec
                }
                NutritionOp::CreateMeal(new) => RequestSpec::new(Method::POST, MEAL).json(body(new)?),
                NutritionOp::DeleteMeal { id } => RequestSpec::new(Method::DELETE, item(MEAL, *id)),
            },
            Operation::Weight(op) => match op {
                WeightOp::List { since, page } => {
                    let mut spec = page.apply(RequestSpec::get(WEIGHT_ENTRY)).query("ordering", "date");
                    if let Some(since) = since {
                        spec = spec.query("date__gte", since);
                    }
                    spec
                }
                WeightOp::Create(new) => {
                    RequestSpec::new(Method::POST, WEIGHT_ENTRY).json(body(new)?)
                }
                WeightOp::Update { id, patch } => {
                    RequestSpec::new(Method::PATCH, item(WEIGHT_ENTRY, *id)).json(body(patch)?)
                }
                WeightOp::Delete { id } => {
                    RequestSpec::new(Method::DELETE, item(WEIGHT_ENTRY, *id))
                }
            },
            Operation::Exercise(op) => match op {
                ExerciseOp::Search { term, language } => RequestSpec::get("/api/v2/exercise/search/")
                    .query("term", term)
                    .query("language", language),
                ExerciseOp::Get { id } => RequestSpec::get(item("/api/v2/exerciseinfo/", *id)),
            },
        };
        Ok(spec)
    }

    /// Decode a flow message's `action` + `payload` into an operation.
    pub fn from_action(action: &str, payload: Value) -> Result<Self, OperationError> {
        let payload = if payload.is_null() {
            Value::Object(Default::default())
        } else {
            payload
        };
        let decode = Decoder { action, payload };

        let op = match action {
            "listWorkouts" => Operation::Workout(WorkoutOp::List { page: decode.args()? }),
            "getWorkout" => Operation::Workout(WorkoutOp::Get { id: decode.id()? }),
            "createWorkout" => Operation::Workout(WorkoutOp::Create(decode.args()?)),
            "updateWorkout" => {
                let Update { id, patch } = decode.args()?;
                Operation::Workout(WorkoutOp::Update { id, patch })
            }
            "deleteWorkout" => Operation::Workout(WorkoutOp::Delete { id: decode.id()? }),

            "listNutritionPlans" => {
                Operation::Nutrition(NutritionOp::ListPlans { page: decode.args()? })
            }
            "getNutritionPlan" => Operation::Nutrition(NutritionOp::GetPlan { id: decode.id()? }),
            "createNutritionPlan" => Operation::Nutrition(NutritionOp::CreatePlan(decode.args()?)),
            "deleteNutritionPlan" => {
                Operation::Nutrition(NutritionOp::DeletePlan { id: decode.id()? })
            }
            "listMeals" => {
                let MealQuery { plan, page } = decode.args()?;
                Operation::Nutrition(NutritionOp::ListMeals { plan, page })
            }
            "createMeal" => Operation::Nutrition(NutritionOp::CreateMeal(decode.args()?)),
            "deleteMeal" => Operation::Nutrition(NutritionOp::DeleteMeal { id: decode.id()? }),

            "listWeightEntries" => {
                let WeightQuery { since, page } = decode.args()?;
                Operation::Weight(WeightOp::List { since, page })
            }
            "createWeightEntry" => Operation::Weight(WeightOp::Create(decode.args()?)),
            "updateWeightEntry" => {
                let Update { id, patch } = decode.args()?;
                Operation::Weight(WeightOp::Update { id, patch })
            }
            "deleteWeightEntry" => Operation::Weight(WeightOp::Delete { id: decode.id()? }),

            "searchExercises" => {
                let SearchQuery { term, language } = decode.args()?;
                Operation::Exercise(ExerciseOp::Search { term, language })
            }
            "getExercise" => Operation::Exercise(ExerciseOp::Get { id: decode.id()? }),

            other => return Err(OperationError::UnknownAction(other.to_string())),
        };
        Ok(op)
    }
}

// ============================================================================
// Payload decoding
// ============================================================================

struct Decoder<'a> {
    action: &'a str,
    payload: Value,
}

impl Decoder<'_> {
    fn args<T: DeserializeOwned>(&self) -> Result<T, OperationError> {
        T::deserialize(&self.payload).map_err(|source| OperationError::InvalidPayload {
            action: self.action.to_string(),
            source,
        })
    }

    fn id(&self) -> Result<u64, OperationError> {
        self.args::<IdArgs>().map(|args| args.id)
    }
}

#[derive(Deserialize)]
struct IdArgs {
    id: u64,
}

#[derive(Deserialize)]
struct Update<P> {
    id: u64,
    #[serde(flatten)]
    patch: P,
}

#[derive(Deserialize)]
struct MealQuery {
    #[serde(default)]
    plan: Option<u64>,
    #[serde(flatten)]
    page: Page,
}

#[derive(Deserialize)]
struct WeightQuery {
    #[serde(default)]
    since: Option<NaiveDate>,
    #[serde(flatten)]
    page: Page,
}

#[derive(Deserialize)]
struct SearchQuery {
    term: String,
    #[serde(default = "default_language")]
    language: String,
}

fn default_language() -> String {
    "en".to_string()
}
