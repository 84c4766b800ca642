//! Clock functions: `now`, `today`, `timeOfDay`.

use super::FunctionRegistry;
use crate::model::{FhirDate, FhirDateTime, FhirPathValue, FhirTime};
use chrono::{Datelike, Local, Offset, Timelike};

pub fn register(registry: &mut FunctionRegistry) {
    registry.register("now", |_, _, _| {
        let now = Local::now();
        let offset_minutes = now.offset().fix().local_minus_utc() / 60;
        Ok(vec![FhirPathValue::DateTime(FhirDateTime {
            date: FhirDate::from_ymd(now.year(), now.month(), now.day()),
            hour: Some(now.hour()),
            minute: Some(now.minute()),
            second: Some(now.second()),
            millisecond: Some(now.timestamp_subsec_millis().min(999)),
            tz_offset_minutes: Some(offset_minutes),
        })])
    });

    registry.register("today", |_, _, _| {
        let now = Local::now();
        Ok(vec![FhirPathValue::Date(FhirDate::from_ymd(
            now.year(),
            now.month(),
            now.day(),
        ))])
    });

    registry.register("timeOfDay", |_, _, _| {
        let now = Local::now();
        Ok(vec![FhirPathValue::Time(FhirTime::new(
            now.hour(),
            Some(now.minute()),
            Some(now.second()),
            Some(now.timestamp_subsec_millis().min(999)),
        ))])
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluator::context::EvaluationContext;
    use crate::evaluator::functions::FunctionContext;
    use crate::model::DateTimePrecision;
    use fhirkit_ucum::UcumConverter;

    #[test]
    fn test_clock_functions_shape() {
        let registry = FunctionRegistry::new();
        let evaluation = EvaluationContext::empty();
        let converter = UcumConverter::new();
        let ctx = FunctionContext {
            evaluation: &evaluation,
            converter: &converter,
        };

        let now = registry.call("now", &ctx, &Vec::new(), &[]).unwrap();
        let FhirPathValue::DateTime(dt) = &now[0] else {
            panic!("expected datetime");
        };
        assert_eq!(dt.precision(), DateTimePrecision::Millisecond);
        assert!(dt.tz_offset_minutes.is_some());

        let today = registry.call("today", &ctx, &Vec::new(), &[]).unwrap();
        assert!(matches!(today[0], FhirPathValue::Date(_)));

        let time = registry.call("timeOfDay", &ctx, &Vec::new(), &[]).unwrap();
        assert!(matches!(time[0], FhirPathValue::Time(_)));
    }
}
