//! GBNF grammar forcing the tool-loop output contract:
//! a single `{"final": ...}` or `{"tool_calls": [...]}` object.
//!
//! Derivation is a deterministic function of the tool names.

pub fn tool_loop_grammar(tool_names: &[String]) -> String {
    let mut grammar = String::new();
    grammar.push_str("root ::= final_object | tool_calls_object\n");
    grammar.push_str("final_object ::= \"{\" ws \"\\\"final\\\"\" ws \":\" ws string \"}\" ws\n");
    grammar.push_str(
        "tool_calls_object ::= \"{\" ws \"\\\"tool_calls\\\"\" ws \":\" ws tool_calls \"}\" ws\n",
    );
    grammar.push_str("tool_calls ::= \"[\" ws tool_call_list? \"]\" ws\n");
    grammar.push_str("tool_call_list ::= tool_call (\",\" ws tool_call)*\n");
    grammar.push_str(
        "tool_call ::= \"{\" ws id_pair \",\" ws name_pair \",\" ws arguments_pair ws \"}\" ws\n",
    );
    grammar.push_str("id_pair ::= \"\\\"id\\\"\" ws \":\" ws string\n");
    grammar.push_str("name_pair ::= \"\\\"name\\\"\" ws \":\" ws function_name\n");
    grammar.push_str("arguments_pair ::= \"\\\"arguments\\\"\" ws \":\" ws json_value\n\n");

    grammar.push_str("function_name ::= ");
    if tool_names.is_empty() {
        grammar.push_str("string");
    } else {
        grammar.push('(');
        for (i, name) in tool_names.iter().enumerate() {
            if i > 0 {
                grammar.push_str(" | ");
            }
            grammar.push_str(&format!("\"\\\"{}\\\"\"", name));
        }
        grammar.push_str(") ws");
    }
    grammar.push_str("\n\n");

    grammar.push_str(
        r#"string ::= "\"" char* "\"" ws
char ::= [^"\\\x7F\x00-\x1F] | "\\" (["\\bfnrt] | "u" [0-9a-fA-F]{4})
number ::= ("-"? [0-9]+) ("." [0-9]+)? ([eE] [-+]? [0-9]+)? ws
json_object ::= "{" ws (json_pair ("," ws json_pair)*)? "}" ws
json_pair ::= string ":" ws json_value
json_array ::= "[" ws (json_value ("," ws json_value)*)? "]" ws
json_value ::= json_object | json_array | string | number | ("true" | "false" | "null") ws
ws ::= [ \t\n]*
"#,
    );
    grammar
}
