//! Per-family tree-sitter query sources.
//!
//! Capture conventions:
//! - `@def.<kind>` on the definition node, `@name` on its name node
//! - `@scope.<kind>` on scope nodes
//! - `@ref.<role>` on identifier occurrences (call/read/type)
//! - `@import` on import statements (details walked in extraction)
//! - `@ann` on type-annotation sites
//! - `@access` on member-access chains
//! - `@sem_*` evidence captures feeding the file scaffold text

pub const PYTHON_DEFS: &str = r#"
(function_definition name: (identifier) @name) @def.function
(class_definition name: (identifier) @name) @def.class
(module (expression_statement (assignment left: (identifier) @name) @def.variable))
"#;

pub const PYTHON_SCOPES: &str = r#"
(function_definition) @scope.function
(class_definition) @scope.class
(lambda) @scope.lambda
(list_comprehension) @scope.comprehension
(dictionary_comprehension) @scope.comprehension
(set_comprehension) @scope.comprehension
(generator_expression) @scope.comprehension
"#;

pub const PYTHON_REFS: &str = r#"
(call function: (identifier) @ref.call)
(call function: (attribute attribute: (identifier) @ref.call))
(decorator (identifier) @ref.read)
(type (identifier) @ref.type)
(assignment right: (identifier) @ref.read)
(return_statement (identifier) @ref.read)
(argument_list (identifier) @ref.read)
"#;

pub const PYTHON_IMPORTS: &str = r#"
(import_statement) @import
(import_from_statement) @import
"#;

pub const PYTHON_ANNOTATIONS: &str = r#"
(typed_parameter) @ann
(assignment left: (identifier) type: (type)) @ann
"#;

pub const PYTHON_ACCESSES: &str = "(attribute) @access";

pub const PYTHON_SEM: &str = r#"
(call function: (identifier) @sem_call)
(call function: (attribute attribute: (identifier) @sem_call))
(assignment left: (attribute attribute: (identifier) @sem_field))
(return_statement (identifier) @sem_return)
(raise_statement (call function: (identifier) @sem_raise))
(raise_statement (identifier) @sem_raise)
(pair key: (string) @sem_key)
"#;

pub const RUST_DEFS: &str = r#"
(function_item name: (identifier) @name) @def.function
(struct_item name: (type_identifier) @name) @def.struct
(enum_item name: (type_identifier) @name) @def.enum
(trait_item name: (type_identifier) @name) @def.trait
(mod_item name: (identifier) @name) @def.module
(const_item name: (identifier) @name) @def.constant
(static_item name: (identifier) @name) @def.constant
(type_item name: (type_identifier) @name) @def.typedef
"#;

pub const RUST_SCOPES: &str = r#"
(function_item) @scope.function
(impl_item) @scope.class
(closure_expression) @scope.lambda
(block) @scope.block
"#;

pub const RUST_REFS: &str = r#"
(call_expression function: (identifier) @ref.call)
(call_expression function: (field_expression field: (field_identifier) @ref.call))
(call_expression function: (scoped_identifier name: (identifier) @ref.call))
(macro_invocation macro: (identifier) @ref.call)
(type_identifier) @ref.type
"#;

pub const RUST_IMPORTS: &str = "(use_declaration) @import";

pub const RUST_ANNOTATIONS: &str = r#"
(let_declaration pattern: (identifier) type: (_)) @ann
(parameter pattern: (identifier) type: (_)) @ann
"#;

pub const RUST_ACCESSES: &str = "(field_expression) @access";

pub const RUST_SEM: &str = r#"
(call_expression function: (identifier) @sem_call)
(call_expression function: (field_expression field: (field_identifier) @sem_call))
(call_expression function: (scoped_identifier name: (identifier) @sem_call))
(assignment_expression left: (field_expression field: (field_identifier) @sem_field))
(return_expression (identifier) @sem_return)
"#;

pub const JAVASCRIPT_DEFS: &str = r#"
(function_declaration name: (identifier) @name) @def.function
(class_declaration name: (identifier) @name) @def.class
(method_definition name: (property_identifier) @name) @def.function
(lexical_declaration (variable_declarator name: (identifier) @name value: (arrow_function))) @def.function
"#;

pub const JAVASCRIPT_SCOPES: &str = r#"
(function_declaration) @scope.function
(method_definition) @scope.function
(class_declaration) @scope.class
(arrow_function) @scope.lambda
(statement_block) @scope.block
"#;

pub const JAVASCRIPT_REFS: &str = r#"
(call_expression function: (identifier) @ref.call)
(call_expression function: (member_expression property: (property_identifier) @ref.call))
(new_expression constructor: (identifier) @ref.call)
"#;

pub const JAVASCRIPT_IMPORTS: &str = "(import_statement) @import";

pub const JAVASCRIPT_ACCESSES: &str = "(member_expression) @access";

pub const JAVASCRIPT_SEM: &str = r#"
(call_expression function: (identifier) @sem_call)
(call_expression
    function: (member_expression property: (property_identifier) @sem_call))
(assignment_expression
    left: (member_expression property: (property_identifier) @sem_field))
(return_statement (identifier) @sem_return)
(throw_statement (new_expression constructor: (identifier) @sem_raise))
(pair key: (property_identifier) @sem_key)
"#;

pub const TYPESCRIPT_DEFS: &str = r#"
(function_declaration name: (identifier) @name) @def.function
(class_declaration name: (type_identifier) @name) @def.class
(method_definition name: (property_identifier) @name) @def.function
(interface_declaration name: (type_identifier) @name) @def.interface
(type_alias_declaration name: (type_identifier) @name) @def.typedef
(lexical_declaration (variable_declarator name: (identifier) @name value: (arrow_function))) @def.function
"#;

pub const TYPESCRIPT_SCOPES: &str = r#"
(function_declaration) @scope.function
(method_definition) @scope.function
(class_declaration) @scope.class
(arrow_function) @scope.lambda
(statement_block) @scope.block
"#;

pub const GO_DEFS: &str = r#"
(function_declaration name: (identifier) @name) @def.function
(method_declaration name: (field_identifier) @name) @def.function
(type_declaration (type_spec name: (type_identifier) @name)) @def.struct
"#;

pub const GO_SCOPES: &str = r#"
(function_declaration) @scope.function
(method_declaration) @scope.function
(block) @scope.block
"#;

pub const GO_REFS: &str = r#"
(call_expression function: (identifier) @ref.call)
(call_expression function: (selector_expression field: (field_identifier) @ref.call))
"#;

pub const GO_IMPORTS: &str = "(import_declaration) @import";

pub const GO_SEM: &str = r#"
(call_expression function: (identifier) @sem_call)
(call_expression function: (selector_expression field: (field_identifier) @sem_call))
(return_statement (expression_list (identifier) @sem_return))
"#;

pub const PHP_DEFS: &str = r#"
(function_definition name: (name) @name) @def.function
(method_declaration name: (name) @name) @def.function
(class_declaration name: (name) @name) @def.class
(interface_declaration name: (name) @name) @def.interface
(trait_declaration name: (name) @name) @def.trait
(enum_declaration name: (name) @name) @def.enum
"#;

pub const PHP_SCOPES: &str = r#"
(function_definition) @scope.function
(method_declaration) @scope.function
(class_declaration) @scope.class
"#;

pub const CPP_DEFS: &str = r#"
(class_specifier name: (type_identifier) @name) @def.class
(struct_specifier name: (type_identifier) @name) @def.struct
(function_definition
  declarator: (function_declarator declarator: (identifier) @name)) @def.function
(function_definition
  declarator: (function_declarator declarator: (field_identifier) @name)) @def.function
(namespace_definition name: (namespace_identifier) @name) @def.module
(enum_specifier name: (type_identifier) @name) @def.enum
(type_definition declarator: (type_identifier) @name) @def.typedef
"#;

pub const CPP_SCOPES: &str = r#"
(function_definition) @scope.function
(class_specifier) @scope.class
(struct_specifier) @scope.class
"#;

pub const SWIFT_DEFS: &str = r#"
(function_declaration name: (simple_identifier) @name) @def.function
(class_declaration name: (type_identifier) @name) @def.class
(protocol_declaration name: (type_identifier) @name) @def.trait
(typealias_declaration name: (type_identifier) @name) @def.typedef
"#;

pub const SWIFT_SCOPES: &str = r#"
(function_declaration) @scope.function
(class_declaration) @scope.class
"#;

pub const KOTLIN_DEFS: &str = r#"
(function_declaration (simple_identifier) @name) @def.function
(class_declaration (type_identifier) @name) @def.class
(object_declaration (type_identifier) @name) @def.struct
(type_alias (type_identifier) @name) @def.typedef
"#;

pub const KOTLIN_SCOPES: &str = r#"
(function_declaration) @scope.function
(class_declaration) @scope.class
"#;

pub const HCL_DEFS: &str = r#"
(block (identifier) @name) @def.block
(attribute (identifier) @name) @def.constant
"#;

pub const HCL_SCOPES: &str = "(block) @scope.block";
