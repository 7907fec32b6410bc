//! Path lookup through the node graph.

use serde_json::Value;

use super::api::ApiError;
use super::Model;
use crate::json_crdt::nodes::Node;
use crate::json_crdt_patch::clock::Ts;
use crate::json_crdt_patch::constants::UNDEFINED;

impl Model {
    /// Resolve `path` from the document root. See [`find_from`](Self::find_from).
    pub fn find(&self, path: &[Value]) -> Result<Ts, ApiError> {
        if self.root.val == UNDEFINED {
            return Err(ApiError::PathNotFound {
                step: "(root)".to_owned(),
            });
        }
        self.find_from(self.root.val, path)
    }

    /// Traverse a JSON-Pointer-like `path` starting at node `start`.
    ///
    /// Object steps are keys, array and vector steps are indices (numbers or
    /// numeric strings). `val` registers are unwrapped before every step.
    pub fn find_from(&self, start: Ts, path: &[Value]) -> Result<Ts, ApiError> {
        let mut current = start;
        for step in path {
            current = self.unwrap_registers(current);
            let node = self
                .index
                .get(&current)
                .ok_or(ApiError::NotFound { id: current })?;
            current = match node {
                Node::Obj(obj) => {
                    let key = match step {
                        Value::String(key) => key.as_str(),
                        _ => return Err(path_not_found(step)),
                    };
                    obj.get(key).ok_or_else(|| path_not_found(step))?
                }
                Node::Arr(arr) => {
                    let index = step_index(step)?;
                    arr.get_at(index).ok_or(ApiError::OutOfBounds {
                        index,
                        len: arr.size(),
                    })?
                }
                Node::Vec(vec) => {
                    let index = step_index(step)?;
                    if index >= vec.len() {
                        return Err(ApiError::OutOfBounds {
                            index,
                            len: vec.len(),
                        });
                    }
                    vec.get(index).ok_or_else(|| path_not_found(step))?
                }
                _ => return Err(path_not_found(step)),
            };
        }
        Ok(current)
    }

    /// Follows `val` registers until a non-register node (or a dead end).
    pub fn unwrap_registers(&self, mut id: Ts) -> Ts {
        // registers can form cycles, so the walk is bounded by the index size
        for _ in 0..=self.index.len() {
            match self.index.get(&id) {
                Some(Node::Val(reg)) if reg.val != UNDEFINED => id = reg.val,
                _ => break,
            }
        }
        id
    }
}

fn path_not_found(step: &Value) -> ApiError {
    let step = match step {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    ApiError::PathNotFound { step }
}

fn step_index(step: &Value) -> Result<usize, ApiError> {
    match step {
        Value::Number(n) => n
            .as_u64()
            .map(|n| n as usize)
            .ok_or_else(|| path_not_found(step)),
        Value::String(s) => s.parse::<usize>().map_err(|_| path_not_found(step)),
        _ => Err(path_not_found(step)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::json_crdt_patch::patch_builder::PatchBuilder;
    use serde_json::json;

    fn model_with(value: Value) -> Model {
        let mut model = Model::new(100_000);
        let mut b = PatchBuilder::from_clock_vector(&model.clock);
        let id = b.json_val(&value).unwrap();
        b.root(id).unwrap();
        model.apply_patch(&b.flush()).unwrap();
        model
    }

    #[test]
    fn finds_nested_values() {
        let model = model_with(json!({"a": {"list": [10, {"b": "x"}]}}));
        let id = model.find(&[json!("a"), json!("list"), json!(1), json!("b")]).unwrap();
        assert_eq!(model.value_view(id), json!("x"));
        let id = model.find(&[json!("a"), json!("list"), json!("0")]).unwrap();
        assert_eq!(model.value_view(id), json!(10));
        let id = model.find(&[]).unwrap();
        assert_eq!(model.value_view(id), model.view());
    }

    #[test]
    fn reports_missing_steps() {
        let model = model_with(json!({"a": [1]}));
        assert_eq!(
            model.find(&[json!("zzz")]),
            Err(ApiError::PathNotFound {
                step: "zzz".to_owned()
            })
        );
        assert_eq!(
            model.find(&[json!("a"), json!(3)]),
            Err(ApiError::OutOfBounds { index: 3, len: 1 })
        );
        assert!(Model::new(100_000).find(&[]).is_err());
    }
}
