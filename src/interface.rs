/// This module contains the request and response bodies of the HTTP API.
/// They are (de)serialized as JSON; the field names are the JSON keys the mobile client uses.
/// Request fields are optional so that a missing parameter is reported with our own 400 message.

use serde::{Deserialize, Serialize};

use crate::training::TrainReport;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MessageResponse
{
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct PrepareDatasetRequest
{
    pub dsid: Option<i64>,
    pub data_path: Option<String>,
    pub weight: Option<usize>,
}

/// One labeled feature vector captured by the client's tutorial screen.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TutorialSample
{
    pub feature: Vec<f32>,
    pub label: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct PrepareUserDataRequest
{
    pub dsid: Option<i64>,
    pub tutorial_data: Option<Vec<TutorialSample>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct PredictRequest
{
    pub dsid: Option<i64>,
    pub feature: Option<Vec<f32>>,
    /// Sent by the client; only one algorithm exists, so it is ignored.
    pub model_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InsertedResponse
{
    pub message: String,
    pub inserted: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeletedResponse
{
    pub message: String,
    pub deleted: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrainResponse
{
    pub message: String,
    #[serde(flatten)]
    pub report: TrainReport,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PredictResponse
{
    pub prediction: usize,
    pub label: String,
    pub probability: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorResponse
{
    pub detail: String,
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn missing_request_fields_deserialize_as_none()
    {
        let req: PredictRequest = serde_json::from_str(r#"{"dsid": 4}"#).unwrap();
        assert_eq!(req.dsid, Some(4));
        assert!(req.feature.is_none());

        let req: PrepareDatasetRequest = serde_json::from_str("{}").unwrap();
        assert_eq!(req, PrepareDatasetRequest::default());
    }

    #[test]
    fn train_response_is_flat()
    {
        let response = TrainResponse {
            message: "ok".to_string(),
            report: TrainReport {
                dsid: 2,
                model_path: "models/model_dsid_2_GBDT.json".to_string(),
                encoder_path: "models/label_encoder_dsid_2.json".to_string(),
                baseline_samples: 10,
                user_samples: 3,
                classes: 4,
                train_accuracy: 1.0,
            },
        };
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["model_path"], "models/model_dsid_2_GBDT.json");
        assert_eq!(value["classes"], 4);
        assert_eq!(value["message"], "ok");
    }
}
