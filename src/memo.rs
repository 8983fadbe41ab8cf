//! Size-bounded user data container with a callback style script API.

use crate::config::{DEFAULT_MAX_MEMO_SIZE, MEMO_TOO_LARGE_CODE};
use crate::errors::{ExprError, Result};
use crate::pather::Pather;
use crate::platform::ScriptInvocation;
use crate::value::{Map, Value, rough_size, rough_size_bounded};
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct MemoOptions {
    pub data: Value,
    pub max_size: Option<usize>,
    pub err_code: Option<String>,
    /// When set, the budget is `max_size` on top of the size of the initial data.
    pub additive_size: bool,
    pub initial_size: Option<usize>,
    /// Hides `set` from the script API.
    pub read_only_api: bool,
}

impl Default for MemoOptions {
    fn default() -> Self {
        Self {
            data: Value::Object(Map::new()),
            max_size: None,
            err_code: None,
            additive_size: false,
            initial_size: None,
            read_only_api: false,
        }
    }
}

#[derive(Debug)]
struct MemoState {
    data: Value,
    initial_size: Option<usize>,
    current_size: Option<usize>,
}

#[derive(Debug)]
pub struct Memo {
    state: Mutex<MemoState>,
    max_size: usize,
    err_code: String,
    additive_size: bool,
    read_only_api: bool,
}

fn trimmed(path: Option<&str>) -> &str {
    path.map(str::trim).unwrap_or("")
}

fn js_type_of(v: &Value) -> &'static str {
    match v.unmarked() {
        Value::Undefined => "undefined",
        Value::Bool(_) => "boolean",
        Value::Int(_) | Value::Double(_) => "number",
        Value::String(_) => "string",
        _ => "object",
    }
}

impl Memo {
    #[must_use]
    pub fn new(options: MemoOptions) -> Self {
        Self {
            state: Mutex::new(MemoState {
                data: options.data,
                initial_size: options.initial_size,
                current_size: options.initial_size,
            }),
            max_size: options.max_size.unwrap_or(DEFAULT_MAX_MEMO_SIZE),
            err_code: options.err_code.unwrap_or_else(|| MEMO_TOO_LARGE_CODE.to_string()),
            additive_size: options.additive_size,
            read_only_api: options.read_only_api,
        }
    }

    /// Wraps `data` unless it already is a memo. Null and undefined become an empty object.
    #[must_use]
    pub fn from_value(data: Value, options: MemoOptions) -> Arc<Memo> {
        match data {
            Value::Memo(memo) => memo,
            v if v.is_nullish() => Arc::new(Memo::new(MemoOptions { data: Value::Object(Map::new()), ..options })),
            v => Arc::new(Memo::new(MemoOptions { data: v, ..options })),
        }
    }

    /// Unwraps a memo to its data; other set values pass through, unset ones become `default`.
    #[must_use]
    pub fn to_value(memo: &Value, default: Value) -> Value {
        match memo {
            Value::Memo(m) => m.data(),
            v if v.is_nullish() => default,
            v => v.clone(),
        }
    }

    #[must_use]
    pub fn is_memo_like(v: &Value) -> bool {
        matches!(v, Value::Memo(_)) || v.is_object()
    }

    #[must_use]
    pub fn data(&self) -> Value {
        self.state.lock().data.clone()
    }

    /// Replaces the data and forgets any computed sizes.
    pub fn set_data(&self, data: Value) {
        let mut st = self.state.lock();
        st.data = data;
        st.initial_size = None;
        st.current_size = None;
    }

    fn calc_size(&self, st: &mut MemoState) -> Result<usize> {
        if let Some(initial) = st.initial_size {
            return Ok(initial);
        }
        let bound = if self.additive_size { None } else { Some(self.max_size) };
        let size = rough_size_bounded(&st.data, bound, &self.err_code)?;
        st.initial_size = Some(size);
        st.current_size = Some(size);
        Ok(size)
    }

    fn max_size_locked(&self, st: &mut MemoState) -> Result<usize> {
        let initial = self.calc_size(st)?;
        Ok(if self.additive_size { initial.saturating_add(self.max_size) } else { self.max_size })
    }

    pub fn get_size(&self) -> Result<usize> {
        let mut st = self.state.lock();
        self.calc_size(&mut st)?;
        Ok(st.current_size.unwrap_or_default())
    }

    pub fn get_max_size(&self) -> Result<usize> {
        let mut st = self.state.lock();
        self.max_size_locked(&mut st)
    }

    /// Reads `path`, or the whole data when the path is empty.
    #[must_use]
    pub fn get(&self, path: Option<&str>) -> Value {
        let st = self.state.lock();
        let path = trimmed(path);
        if path.is_empty() { st.data.clone() } else { Pather::sandbox().read(&st.data, path) }
    }

    #[must_use]
    pub fn is_array(&self, path: Option<&str>) -> bool {
        self.get(path).is_array()
    }

    /// Length of the array or string at `path`; undefined for other values.
    pub fn get_length(&self, path: Option<&str>) -> Result<Value> {
        let target = self.get(path);
        if target.is_nullish() {
            return Err(ExprError::invalid_argument(format!(
                "Cannot read length of {}",
                if target.is_undefined() { "undefined" } else { "null" }
            )));
        }
        Ok(Pather::legacy().read(&target, "length"))
    }

    #[must_use]
    pub fn type_of(&self, path: Option<&str>) -> &'static str {
        js_type_of(&self.get(path))
    }

    /// Writes `value` at `path`, or replaces the data when the path is empty.
    ///
    /// Fails with the memo's error code when the write would grow the memo past its budget.
    pub fn set(&self, path: Option<&str>, value: Value) -> Result<()> {
        let mut st = self.state.lock();
        let max = self.max_size_locked(&mut st)?;
        let path = trimmed(path);
        if path.is_empty() {
            let value = if value.is_nullish() { Value::Object(Map::new()) } else { value };
            let value_sz = rough_size_bounded(&value, Some(max), &self.err_code)?;
            st.data = value;
            st.current_size = Some(value_sz);
            return Ok(());
        }
        let pather = Pather::sandbox();
        let curr_sz = rough_size(&pather.read(&st.data, path));
        let value_sz = rough_size_bounded(&value, Some(max), &self.err_code)?;
        let current = st.current_size.unwrap_or_default();
        let next = (current + value_sz).saturating_sub(curr_sz);
        if next > max {
            return Err(ExprError::too_large(
                self.err_code.clone(),
                format!("Memo would grow to {next} bytes, more than the {max} allowed."),
            ));
        }
        if !pather.write(&mut st.data, path, value).is_undefined() {
            st.current_size = Some(next);
        }
        Ok(())
    }

    #[must_use]
    pub fn script_api(memo: &Arc<Memo>) -> MemoScriptApi {
        MemoScriptApi { memo: memo.clone() }
    }
}

/// Script facing memo API. Every method replies through `callback` instead of returning.
#[derive(Clone)]
pub struct MemoScriptApi {
    memo: Arc<Memo>,
}

impl MemoScriptApi {
    /// Names of the exposed methods; `set` is missing for read-only memos.
    #[must_use]
    pub fn methods(&self) -> Vec<&'static str> {
        let mut names = vec!["get", "getSize", "getLength", "typeOf", "isArray"];
        if !self.memo.read_only_api {
            names.push("set");
        }
        names
    }

    pub fn get_size<F: FnOnce(Result<Value>)>(&self, _script: &ScriptInvocation, _message: &Value, callback: F) {
        callback(self.memo.get_size().map(Value::from));
    }

    pub fn is_array<F: FnOnce(Result<Value>)>(
        &self,
        _script: &ScriptInvocation,
        _message: &Value,
        path: Option<&str>,
        callback: F,
    ) {
        callback(Ok(Value::Bool(self.memo.is_array(path))));
    }

    pub fn get_length<F: FnOnce(Result<Value>)>(
        &self,
        _script: &ScriptInvocation,
        _message: &Value,
        path: Option<&str>,
        callback: F,
    ) {
        callback(self.memo.get_length(path));
    }

    pub fn type_of<F: FnOnce(Result<Value>)>(
        &self,
        _script: &ScriptInvocation,
        _message: &Value,
        path: Option<&str>,
        callback: F,
    ) {
        callback(Ok(Value::from(self.memo.type_of(path))));
    }

    pub fn get<F: FnOnce(Result<Value>)>(
        &self,
        _script: &ScriptInvocation,
        _message: &Value,
        path: Option<&str>,
        callback: F,
    ) {
        callback(Ok(self.memo.get(path)));
    }

    pub fn set<F: FnOnce(Result<Value>)>(
        &self,
        _script: &ScriptInvocation,
        _message: &Value,
        path: Option<&str>,
        value: Value,
        callback: F,
    ) {
        if self.memo.read_only_api {
            callback(Err(ExprError::unsupported("memo.set is not available on a read-only memo")));
            return;
        }
        callback(self.memo.set(path, value).map(|()| Value::Undefined));
    }
}
