//! Instrumentation-time filter rules.
//!
//! The compiler pass asks the filter engine once per function whether to
//! inject enter/exit probes. Rules are scanned in order and the first
//! match wins; a function no rule matches is instrumented (default
//! allow). Rule files deserialize with serde, so front-ends can ship
//! filters as TOML/JSON/YAML without this module caring which.

use serde::{Deserialize, Serialize};

/// What a matching filter does to the function.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterAction {
    Allow,
    Block,
}

/// Facts about a candidate function, supplied by the compiler pass.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionInfo {
    pub source_file_path: String,
    pub demangled_name: String,
    pub linkage_name: String,
    pub ir_instruction_count: i32,
}

/// One rule: an action plus optional predicates. Every present predicate
/// must match (AND); a filter with no predicates matches every function.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    pub action: FilterAction,
    #[serde(default)]
    pub rule_name: Option<String>,
    #[serde(default)]
    pub source_file_path: Option<String>,
    #[serde(default)]
    pub function_demangled_name: Option<String>,
    #[serde(default)]
    pub function_linkage_name: Option<String>,
    #[serde(default)]
    pub function_ir_instruction_count_lt: Option<i32>,
    #[serde(default)]
    pub function_ir_instruction_count_gt: Option<i32>,
}

impl Filter {
    /// String predicates compare by exact equality; the instruction-count
    /// bounds are strict.
    pub fn matches(&self, function_info: &FunctionInfo) -> bool {
        fn string_matches(predicate: &Option<String>, value: &str) -> bool {
            match predicate {
                Some(predicate) => predicate == value,
                None => true,
            }
        }
        string_matches(&self.source_file_path, &function_info.source_file_path)
            && string_matches(
                &self.function_demangled_name,
                &function_info.demangled_name,
            )
            && string_matches(&self.function_linkage_name, &function_info.linkage_name)
            && self
                .function_ir_instruction_count_lt
                .map_or(true, |bound| function_info.ir_instruction_count < bound)
            && self
                .function_ir_instruction_count_gt
                .map_or(true, |bound| function_info.ir_instruction_count > bound)
    }
}

/// Outcome of a filter scan for one function.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InstrumentFunctionResult {
    pub instrument: bool,
    /// Name of the rule that decided, if a rule matched and was named.
    pub active_filter_rule_name: Option<String>,
}

/// Ordered rule list. Order is significant: the first matching filter
/// decides.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Filters {
    filters: Vec<Filter>,
}

impl Filters {
    pub fn new(filters: Vec<Filter>) -> Self {
        Self { filters }
    }

    pub fn instrument_function(
        &self,
        function_info: &FunctionInfo,
    ) -> InstrumentFunctionResult {
        for filter in &self.filters {
            if filter.matches(function_info) {
                return InstrumentFunctionResult {
                    instrument: filter.action == FilterAction::Allow,
                    active_filter_rule_name: filter.rule_name.clone(),
                };
            }
        }
        InstrumentFunctionResult {
            instrument: true,
            active_filter_rule_name: None,
        }
    }
}

impl From<Vec<Filter>> for Filters {
    fn from(filters: Vec<Filter>) -> Self {
        Self::new(filters)
    }
}
