/// Arrow schemas for the institution master table and impact output.
pub mod impact {
    use arrow::array::{ArrayRef, Float64Array, StringArray, UInt64Array};
    use arrow::datatypes::{DataType, Field, Schema};
    use arrow::error::ArrowError;
    use arrow::record_batch::RecordBatch;
    use std::sync::Arc;

    use crate::prediction::PredictionResult;

    /// Schema for the institution master table columns the pipeline reads.
    ///
    /// Extra numeric columns are allowed in practice; these are the ones
    /// with dedicated fields on `InstitutionRecord`.
    pub fn institution_table_schema() -> Schema {
        Schema::new(vec![
            Field::new("institution_id", DataType::Utf8, false),
            Field::new("name", DataType::Utf8, true),
            Field::new("state", DataType::Utf8, false),
            Field::new("institution_type", DataType::Utf8, false),
            Field::new("enrollment", DataType::Float64, true),
            Field::new("net_price", DataType::Float64, true),
            Field::new("grad_rate", DataType::Float64, true),
            Field::new("pct_low_income", DataType::Float64, true),
            Field::new("pct_minority", DataType::Float64, true),
            Field::new("affordability_gap", DataType::Float64, true),
        ])
    }

    /// Schema for per-institution impact rows handed to the export layer.
    pub fn prediction_schema() -> Schema {
        Schema::new(vec![
            Field::new("institution_id", DataType::Utf8, false),
            Field::new("name", DataType::Utf8, true),
            Field::new("state", DataType::Utf8, false),
            Field::new("institution_type", DataType::Utf8, false),
            Field::new("tuition_change_pct", DataType::Float64, false),
            Field::new("tuition_change_dollars", DataType::Float64, false),
            Field::new("enrollment_change_pct", DataType::Float64, false),
            Field::new("students_affected", DataType::UInt64, false),
            Field::new("grad_rate_change", DataType::Float64, false),
            Field::new("equity_risk_class", DataType::Utf8, false),
            Field::new("hours_to_cover_gap", DataType::Float64, false),
            Field::new("equity_override_from", DataType::Utf8, true),
        ])
    }

    /// Convert impact rows into a single RecordBatch with [`prediction_schema`].
    pub fn predictions_to_batch(rows: &[PredictionResult]) -> Result<RecordBatch, ArrowError> {
        let strings = |f: fn(&PredictionResult) -> Option<&str>| -> ArrayRef {
            Arc::new(rows.iter().map(f).collect::<StringArray>())
        };
        let floats = |f: fn(&PredictionResult) -> f64| -> ArrayRef {
            Arc::new(Float64Array::from_iter_values(rows.iter().map(f)))
        };

        let columns: Vec<ArrayRef> = vec![
            strings(|r| Some(r.institution_id.as_str())),
            strings(|r| r.name.as_deref()),
            strings(|r| Some(r.state.as_str())),
            strings(|r| Some(r.institution_type.as_str())),
            floats(|r| r.tuition_change_pct),
            floats(|r| r.tuition_change_dollars),
            floats(|r| r.enrollment_change_pct),
            Arc::new(UInt64Array::from_iter_values(
                rows.iter().map(|r| r.students_affected),
            )),
            floats(|r| r.grad_rate_change),
            strings(|r| Some(r.equity_risk_class.as_str())),
            floats(|r| r.hours_to_cover_gap),
            strings(|r| r.equity_override.as_ref().map(|o| o.from.as_str())),
        ];

        RecordBatch::try_new(Arc::new(prediction_schema()), columns)
    }
}

#[cfg(test)]
mod tests {
    use super::impact;
    use crate::prediction::{EquityOverride, EquityRiskClass, PredictionResult};
    use arrow::array::{Array, StringArray};

    #[test]
    fn institution_table_schema_has_expected_fields() {
        let schema = impact::institution_table_schema();
        assert_eq!(schema.fields().len(), 10);
        assert!(schema.field_with_name("institution_id").is_ok());
        assert!(schema.field_with_name("affordability_gap").is_ok());
    }

    #[test]
    fn prediction_schema_has_expected_fields() {
        let schema = impact::prediction_schema();
        assert_eq!(schema.fields().len(), 12);
        assert!(schema.field_with_name("equity_risk_class").is_ok());
    }

    #[test]
    fn predictions_convert_to_batch() {
        let base = PredictionResult {
            institution_id: "1".into(),
            name: Some("Alpha State".into()),
            state: "CA".into(),
            institution_type: "public".into(),
            tuition_change_pct: 6.0,
            tuition_change_dollars: 600.0,
            enrollment_change_pct: -3.0,
            students_affected: 300,
            grad_rate_change: -1.5,
            equity_risk_class: EquityRiskClass::High,
            hours_to_cover_gap: 40.0,
            pct_low_income: Some(80.0),
            pct_minority: Some(30.0),
            equity_override: Some(EquityOverride {
                from: EquityRiskClass::Medium,
                to: EquityRiskClass::High,
                pct_low_income: 80.0,
                tuition_change_pct: 6.0,
            }),
        };
        let plain = PredictionResult {
            institution_id: "2".into(),
            name: None,
            equity_override: None,
            ..base.clone()
        };

        let batch = impact::predictions_to_batch(&[base, plain]).unwrap();
        assert_eq!(batch.num_rows(), 2);
        assert_eq!(batch.num_columns(), 12);

        let from = batch
            .column_by_name("equity_override_from")
            .unwrap()
            .as_any()
            .downcast_ref::<StringArray>()
            .unwrap();
        assert_eq!(from.value(0), "Medium");
        assert!(from.is_null(1));
    }

    #[test]
    fn empty_rows_give_empty_batch() {
        let batch = impact::predictions_to_batch(&[]).unwrap();
        assert_eq!(batch.num_rows(), 0);
    }
}
