use std::io;

use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("all fetch attempts failed for {dataset}")]
    Fetch { dataset: String },
    #[error("received empty {dataset} from server")]
    EmptyPayload { dataset: String },
    #[error("insufficient {dataset} in spreadsheet ({rows} rows)")]
    InsufficientData { dataset: String, rows: usize },
    #[error("request via {route} timed out")]
    Timeout { route: String },
    #[error("{route} returned a payload that is not CSV")]
    Rejected { route: String },
    #[error("{dataset} is still loading")]
    NotLoaded { dataset: String },
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error("{0}")]
    Config(String),
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Storage(String),
}

impl AppError {
    /// Copy shown to the person at the front end when a sheet load gives up.
    pub fn user_message(&self) -> String {
        match self {
            AppError::Fetch { dataset }
            | AppError::EmptyPayload { dataset }
            | AppError::InsufficientData { dataset, .. } => {
                if dataset.contains("meetup") {
                    "Meetup data temporarily unavailable. Please try again in a moment.".into()
                } else {
                    "Data temporarily unavailable. Please try again in a moment.".into()
                }
            }
            AppError::Validation(message) => message.clone(),
            AppError::Storage(_) => "Failed to save booking. Please try again.".into(),
            other => other.to_string(),
        }
    }

    /// Whether the error came from the load boundary and is worth retrying.
    pub fn is_load_failure(&self) -> bool {
        matches!(
            self,
            AppError::Fetch { .. }
                | AppError::EmptyPayload { .. }
                | AppError::InsufficientData { .. }
                | AppError::Timeout { .. }
                | AppError::Rejected { .. }
                | AppError::Http(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_failures_map_to_dataset_copy() {
        let orders = AppError::Fetch {
            dataset: "orders data".into(),
        };
        let meetup = AppError::InsufficientData {
            dataset: "meetup data".into(),
            rows: 0,
        };
        assert!(orders.user_message().starts_with("Data temporarily"));
        assert!(meetup.user_message().starts_with("Meetup data temporarily"));
        assert!(orders.is_load_failure());
        assert!(!AppError::Validation("nope".into()).is_load_failure());
    }
}
