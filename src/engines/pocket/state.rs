use std::borrow::Cow;
use std::collections::BTreeMap;

use ndarray::{ArrayD, IxDyn};
use ort::session::{Session, SessionInputValue};
use ort::tensor::TensorElementType;
use ort::value::{DynValue, TensorRef, ValueType};

use crate::error::{Result, TtsError};

const STATE_PREFIX: &str = "state_";
const OUT_STATE_PREFIX: &str = "out_state_";

#[derive(Debug, Clone)]
enum StateTensor {
    F32(ArrayD<f32>),
    I64(ArrayD<i64>),
    Bool(ArrayD<bool>),
}

/// Recurrent state of a streaming graph.
///
/// The graph takes `state_<i>` inputs and returns the next value of each as
/// `out_state_<i>`. A fresh state is cloned from the zero template built at
/// load time, so concurrent calls never share it.
#[derive(Debug, Clone, Default)]
pub(super) struct StreamState {
    slots: BTreeMap<usize, StateTensor>,
}

impl StreamState {
    /// Zero-filled state shaped from the graph's input metadata. Dynamic
    /// dimensions start at 0.
    pub fn zeros(session: &Session) -> Result<Self> {
        let mut slots = BTreeMap::new();
        for input in session.inputs() {
            let Some(index) = slot_index(input.name(), STATE_PREFIX) else {
                continue;
            };
            let ValueType::Tensor { ty, shape, .. } = input.dtype() else {
                return Err(TtsError::Inference(format!(
                    "state input '{}' is not a tensor",
                    input.name()
                )));
            };

            let dims: Vec<usize> = shape.iter().map(|&d| d.max(0) as usize).collect();
            let dims = IxDyn(&dims);
            let tensor = match ty {
                TensorElementType::Int64 => StateTensor::I64(ArrayD::zeros(dims)),
                TensorElementType::Bool => StateTensor::Bool(ArrayD::from_elem(dims, false)),
                _ => StateTensor::F32(ArrayD::zeros(dims)),
            };
            slots.insert(index, tensor);
        }
        Ok(Self { slots })
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Borrow every slot as a named session input, in index order.
    pub fn inputs(&self) -> Result<Vec<(Cow<'static, str>, SessionInputValue<'_>)>> {
        let mut inputs = Vec::with_capacity(self.slots.len());
        for (index, tensor) in &self.slots {
            let value: SessionInputValue<'_> = match tensor {
                StateTensor::F32(a) => TensorRef::from_array_view(a.view())?.into(),
                StateTensor::I64(a) => TensorRef::from_array_view(a.view())?.into(),
                StateTensor::Bool(a) => TensorRef::from_array_view(a.view())?.into(),
            };
            inputs.push((Cow::Owned(format!("{STATE_PREFIX}{index}")), value));
        }
        Ok(inputs)
    }

    /// Take the new value of a slot from an `out_state_<i>` output. Other
    /// outputs are ignored.
    pub fn absorb(&mut self, name: &str, value: &DynValue) -> Result<()> {
        let Some(index) = slot_index(name, OUT_STATE_PREFIX) else {
            return Ok(());
        };
        let Some(slot) = self.slots.get_mut(&index) else {
            log::debug!("Ignoring output {name} with no matching state input");
            return Ok(());
        };
        match slot {
            StateTensor::F32(a) => *a = value.try_extract_array::<f32>()?.to_owned(),
            StateTensor::I64(a) => *a = value.try_extract_array::<i64>()?.to_owned(),
            StateTensor::Bool(a) => *a = value.try_extract_array::<bool>()?.to_owned(),
        }
        Ok(())
    }
}

fn slot_index(name: &str, prefix: &str) -> Option<usize> {
    name.strip_prefix(prefix)?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_slot_names() {
        assert_eq!(slot_index("state_12", STATE_PREFIX), Some(12));
        assert_eq!(slot_index("out_state_3", OUT_STATE_PREFIX), Some(3));
        assert_eq!(slot_index("state_x", STATE_PREFIX), None);
        assert_eq!(slot_index("sequence", STATE_PREFIX), None);
        // `out_state_` must not be read as an input slot.
        assert_eq!(slot_index("out_state_3", STATE_PREFIX), None);
    }

    #[test]
    fn inputs_follow_numeric_order() {
        let mut state = StreamState::default();
        for i in [10, 2, 1] {
            state
                .slots
                .insert(i, StateTensor::F32(ArrayD::zeros(IxDyn(&[1, 2, 4]))));
        }
        let names: Vec<String> = state
            .inputs()
            .unwrap()
            .into_iter()
            .map(|(name, _)| name.into_owned())
            .collect();
        assert_eq!(names, vec!["state_1", "state_2", "state_10"]);
    }
}
