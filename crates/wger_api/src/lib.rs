pub mod client;
pub mod operation;
pub mod weight;

pub use client::{WgerClient, WgerError};
pub use operation::{
    ExerciseOp, NutritionOp, Operation, OperationError, Page, WeightOp, WorkoutOp,
};
pub use weight::{WeightEntry, WeightPoint, WeightStats, WeightStatsCache};
