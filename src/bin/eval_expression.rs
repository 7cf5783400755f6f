//! Demonstration and test tool for the crate's default expression language.
//! Usage:
//!    eval <expression> [<expression> ...]
use std::collections::HashMap;
use std::process;

use scxml_runtime::datamodel::DataStore;
use scxml_runtime::expr::{DatamodelCtx, DefaultExprEvaluator, ExprEvaluator};

fn main() {
    #[cfg(feature = "EnvLog")]
    env_logger::init();

    let (_named_opt, final_args) = scxml_runtime::get_arguments(&[]);

    if final_args.is_empty() {
        println!("Missing argument. Please specify one or more expressions.");
        process::exit(1);
    }

    let mut evaluator = DefaultExprEvaluator;
    let mut data = DataStore::new();
    let configuration: Vec<u32> = Vec::new();
    let state_name_to_id = HashMap::new();

    for expr in final_args {
        let mut ctx = DatamodelCtx {
            data: &mut data,
            event: None,
            configuration: &configuration,
            state_name_to_id: &state_name_to_id,
        };
        match evaluator.eval_value(expr.as_str(), &mut ctx) {
            Ok(value) => println!("Result: {}", value),
            Err(err) => println!("Error: {}", err),
        }
    }
}
