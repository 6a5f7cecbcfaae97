//! Tabular export of the result log
//!
//! Pure, stateless flattening: single-element fields keep their bare name,
//! longer fields are spread over `field_0`, `field_1`, ...

use crate::row::ResultRow;
use serde_json::{Map, Value};

pub type Record = Map<String, Value>;

fn put_numbers(record: &mut Record, name: &str, values: &[f64]) {
    // serde_json has no NaN; non-finite values export as null
    let to_value = |v: f64| serde_json::Number::from_f64(v).map_or(Value::Null, Value::Number);
    if values.len() == 1 {
        record.insert(name.to_string(), to_value(values[0]));
    } else {
        for (i, &v) in values.iter().enumerate() {
            record.insert(format!("{}_{}", name, i), to_value(v));
        }
    }
}

fn put_flags(record: &mut Record, name: &str, flags: &[bool]) {
    if flags.len() == 1 {
        record.insert(name.to_string(), Value::Bool(flags[0]));
    } else {
        for (i, &flag) in flags.iter().enumerate() {
            record.insert(format!("{}_{}", name, i), Value::Bool(flag));
        }
    }
}

pub fn flatten_row(row: &ResultRow) -> Record {
    let mut record = Record::new();
    record.insert(
        "index".to_string(),
        serde_json::to_value(row.index).unwrap_or(Value::Null),
    );
    put_numbers(&mut record, "input_values", &row.input_values);
    put_flags(&mut record, "inputs_are_outliers", &row.inputs_are_outliers);
    put_numbers(&mut record, "accepted_values", &row.accepted_values);
    put_numbers(&mut record, "predicted_values", &row.predicted_values);
    put_numbers(&mut record, "predicted_upper_limits", &row.predicted_upper_limits);
    put_numbers(&mut record, "predicted_lower_limits", &row.predicted_lower_limits);
    record
}

pub fn flatten_results(results: &[ResultRow]) -> Vec<Record> {
    results.iter().map(flatten_row).collect()
}
