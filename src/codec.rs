//! Boundary codec.
//!
//! Portable expressions travel to the executing side and query outcomes
//! travel back as bincode payloads. Decoding failures surface as
//! [`QueryError::Codec`](crate::error::QueryError::Codec).

use crate::error::QueryResult;
use crate::executor::QueryOutcome;
use crate::expression::PortableExpression;

pub fn encode_expression(expr: &PortableExpression) -> QueryResult<Vec<u8>> {
    Ok(bincode::serialize(expr)?)
}

pub fn decode_expression(bytes: &[u8]) -> QueryResult<PortableExpression> {
    Ok(bincode::deserialize(bytes)?)
}

pub fn encode_outcome(outcome: &QueryOutcome) -> QueryResult<Vec<u8>> {
    Ok(bincode::serialize(outcome)?)
}

pub fn decode_outcome(bytes: &[u8]) -> QueryResult<QueryOutcome> {
    Ok(bincode::deserialize(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dynamic::{DynamicObject, DynamicValue};
    use crate::error::QueryError;
    use crate::types::TypeDescriptor;
    use anyhow::Result;

    #[test]
    fn test_expression_survives_the_boundary() -> Result<()> {
        let order = TypeDescriptor::named("shop.Order");
        let expr = PortableExpression::query_root(order.clone())
            .filter(PortableExpression::lambda1("o", order, |o| {
                PortableExpression::gt(o.member("Amount"), PortableExpression::int32(100))
            }))
            .with_hint("NOLOCK");

        let bytes = encode_expression(&expr)?;
        assert_eq!(decode_expression(&bytes)?, expr);
        Ok(())
    }

    #[test]
    fn test_outcome_keeps_type_info() -> Result<()> {
        let outcome = QueryOutcome::Sequence(vec![DynamicValue::Object(
            DynamicObject::with_type(TypeDescriptor::named("shop.Order"))
                .with("Id", DynamicValue::Int32(7))
                .with("Note", DynamicValue::Null),
        )]);

        let decoded = decode_outcome(&encode_outcome(&outcome)?)?;
        assert_eq!(decoded, outcome);
        Ok(())
    }

    #[test]
    fn test_truncated_payload() -> Result<()> {
        let bytes = encode_expression(&PortableExpression::string("hello"))?;
        let result = decode_expression(&bytes[..bytes.len() - 2]);
        assert!(matches!(result, Err(QueryError::Codec(_))));
        Ok(())
    }
}
