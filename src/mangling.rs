//! Function and field name mangling.
//!
//! Functions live in the program's function table under their mangled form
//! `name:param1;param2;…;ret;` so that overloads stay distinct; call-site
//! resolution looks names up by the same key.

use crate::program::Parameter;
use crate::types::Type;

pub const MANGLE_BEGIN: char = ':';
pub const MANGLE_SEPARATOR: char = ';';

pub fn mangle_function_name(name: &str, params: &[Parameter], return_type: &Type) -> String {
    let mut mangled = String::from(name);
    mangled.push(MANGLE_BEGIN);
    for p in params {
        mangled.push_str(p.type_.name());
        mangled.push(MANGLE_SEPARATOR);
    }
    mangled.push_str(return_type.name());
    mangled.push(MANGLE_SEPARATOR);
    mangled
}

pub fn demangle_name(name: &str) -> &str {
    match name.find(MANGLE_BEGIN) {
        Some(pos) => &name[..pos],
        None => name,
    }
}

pub fn mangle_field_name(name: &str, type_: &Type) -> String {
    format!("{}{}{}{}", name, MANGLE_BEGIN, type_.name(), MANGLE_SEPARATOR)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lang::Language;

    #[test]
    fn test_mangle_function_name() {
        let params = vec![
            Parameter::new(Type::new("type1", 0), Language::PandaAssembly),
            Parameter::new(Type::new("type2", 0), Language::PandaAssembly),
            Parameter::new(Type::new("type3", 0), Language::PandaAssembly),
        ];
        let return_type = Type::new("type4", 0);
        assert_eq!(
            mangle_function_name("Asm.main", &params, &return_type),
            "Asm.main:type1;type2;type3;type4;"
        );
    }

    #[test]
    fn test_demangle_function_name() {
        assert_eq!(demangle_name("Asm.main:type1;type2;type3;type4;"), "Asm.main");
        assert_eq!(demangle_name("plain"), "plain");
    }

    #[test]
    fn test_mangle_field_name() {
        assert_eq!(mangle_field_name("x", &Type::new("i32", 0)), "x:i32;");
    }
}
