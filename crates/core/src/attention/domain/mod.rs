pub mod attention_evaluator;
pub mod signal_filter;
