//! `expr[n]`: the input value from n bars ago.

use std::collections::VecDeque;

use crate::domain::eval::Value;

#[derive(Debug, Clone)]
pub struct History {
    offset: usize,
    values: VecDeque<Value>,
}

impl History {
    pub fn new(offset: usize) -> Self {
        Self {
            offset,
            values: VecDeque::new(),
        }
    }

    pub fn update(&mut self, value: Value) -> Value {
        self.values.push_back(value);
        if self.values.len() > self.offset + 1 {
            self.values.pop_front();
        }
        if self.values.len() == self.offset + 1 {
            self.values.front().copied().unwrap_or(Value::Na)
        } else {
            Value::Na
        }
    }
}
