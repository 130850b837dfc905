//! JSON scope dump consumed by IDE tooling (`--dump-scopes`).

use serde::Serialize;

use crate::program::{Program, SourceLocation};
use crate::Result;

#[derive(Serialize)]
struct FieldDump<'a> {
    name: &'a str,
    #[serde(rename = "type")]
    type_name: String,
}

#[derive(Serialize)]
struct RecordDump<'a> {
    name: &'a str,
    body: SourceLocation,
    fields: Vec<FieldDump<'a>>,
}

#[derive(Serialize)]
struct FunctionDump<'a> {
    name: &'a str,
    #[serde(rename = "return")]
    return_type: String,
    params: Vec<String>,
    regs_num: usize,
    body: SourceLocation,
}

#[derive(Serialize)]
struct ProgramDump<'a> {
    language: &'a str,
    records: Vec<RecordDump<'a>>,
    functions: Vec<FunctionDump<'a>>,
    literal_arrays: Vec<&'a str>,
}

impl Program {
    /// Renders the unit's structure and scope locations as a JSON string.
    pub fn json_dump(&self) -> Result<String> {
        let dump = ProgramDump {
            language: self.lang.as_str(),
            records: self
                .record_table
                .values()
                .map(|rec| RecordDump {
                    name: &rec.name,
                    body: rec.body_location,
                    fields: rec
                        .field_list
                        .iter()
                        .map(|f| FieldDump {
                            name: &f.name,
                            type_name: f.type_.name().to_string(),
                        })
                        .collect(),
                })
                .collect(),
            functions: self
                .function_table
                .values()
                .map(|func| FunctionDump {
                    name: &func.name,
                    return_type: func.return_type.name().to_string(),
                    params: func.params.iter().map(|p| p.type_.name().to_string()).collect(),
                    regs_num: func.regs_num,
                    body: func.body_location,
                })
                .collect(),
            literal_arrays: self.literalarray_table.keys().map(|k| k.as_str()).collect(),
        };

        serde_json::to_string_pretty(&dump)
            .map_err(|e| crate::error::Error::emitter(format!("Unable to dump scopes: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lang::Language;
    use crate::program::{Function, Record};

    #[test]
    fn test_dump_shape() {
        let mut program = Program::new();
        program
            .record_table
            .insert("R".to_string(), Record::new("R", Language::PandaAssembly));
        program
            .function_table
            .insert("f:void;".to_string(), Function::new("f", Language::PandaAssembly));

        let dump = program.json_dump().unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&dump).unwrap();
        assert_eq!(parsed["language"], "PandaAssembly");
        assert_eq!(parsed["records"][0]["name"], "R");
        assert_eq!(parsed["functions"][0]["name"], "f");
    }
}
