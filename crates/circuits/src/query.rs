//! Query descriptors for `AtomicQueryV3`.

use ark_ff::Zero;
use serde::{Deserialize, Serialize, Serializer};

use idenstate_core::field;
use idenstate_core::Fr;

use crate::error::InputsError;

/// Length of the circuit's `value` array.
pub const MAX_QUERY_VALUES: usize = 64;

/// Claim slots a query may address: index A/B and value A/B.
pub const QUERYABLE_SLOTS: [usize; 4] = [2, 3, 5, 6];

/// Comparison operators with their circuit codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Operator {
    Eq,
    Lt,
    Gt,
    In,
    Nin,
    Neq,
    Leq,
    Geq,
}

impl Operator {
    pub fn code(self) -> u8 {
        match self {
            Operator::Eq => 1,
            Operator::Lt => 2,
            Operator::Gt => 3,
            Operator::In => 4,
            Operator::Nin => 5,
            Operator::Neq => 6,
            Operator::Leq => 7,
            Operator::Geq => 8,
        }
    }

    fn is_set_operator(self) -> bool {
        matches!(self, Operator::In | Operator::Nin)
    }
}

/// Which claim slot to compare, how, and against what.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Query {
    pub slot_index: usize,
    pub operator: Operator,
    pub values: Vec<Fr>,
}

impl Query {
    pub fn new(slot_index: usize, operator: Operator, values: Vec<Fr>) -> Self {
        Self { slot_index, operator, values }
    }

    /// Scalar operators take exactly one value, set operators between one
    /// and [`MAX_QUERY_VALUES`].
    pub fn validate(&self) -> Result<(), InputsError> {
        if !QUERYABLE_SLOTS.contains(&self.slot_index) {
            return Err(InputsError::InvalidQuery(format!(
                "slot {} is not a data slot",
                self.slot_index
            )));
        }
        let n = self.values.len();
        if self.operator.is_set_operator() {
            if n == 0 || n > MAX_QUERY_VALUES {
                return Err(InputsError::InvalidQuery(format!(
                    "{:?} takes 1..={MAX_QUERY_VALUES} values, got {n}",
                    self.operator
                )));
            }
        } else if n != 1 {
            return Err(InputsError::InvalidQuery(format!(
                "{:?} takes exactly one value, got {n}",
                self.operator
            )));
        }
        Ok(())
    }

    /// Evaluate the query against a slot value, comparing as integers.
    pub fn matches(&self, slot_value: &Fr) -> bool {
        use idenstate_core::field::fr_to_biguint;

        let x = fr_to_biguint(slot_value);
        let first = self.values.first().map(fr_to_biguint);
        match (self.operator, first) {
            (Operator::Eq, Some(v)) => x == v,
            (Operator::Neq, Some(v)) => x != v,
            (Operator::Lt, Some(v)) => x < v,
            (Operator::Leq, Some(v)) => x <= v,
            (Operator::Gt, Some(v)) => x > v,
            (Operator::Geq, Some(v)) => x >= v,
            (Operator::In, _) => self.values.contains(slot_value),
            (Operator::Nin, _) => !self.values.contains(slot_value),
            (_, None) => false,
        }
    }
}

/// Circuit form: `{slotIndex, operator, values[64], valueArraySize}`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryJson {
    pub slot_index: usize,
    #[serde(serialize_with = "operator_code")]
    pub operator: Operator,
    #[serde(with = "field::decimal_vec")]
    pub values: Vec<Fr>,
    pub value_array_size: usize,
}

fn operator_code<S: Serializer>(op: &Operator, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u8(op.code())
}

impl From<&Query> for QueryJson {
    fn from(query: &Query) -> Self {
        let mut values = query.values.clone();
        values.resize(MAX_QUERY_VALUES, Fr::zero());
        Self {
            slot_index: query.slot_index,
            operator: query.operator,
            values,
            value_array_size: query.values.len(),
        }
    }
}
