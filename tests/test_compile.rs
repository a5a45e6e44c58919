mod fixtures;

use fixtures::*;

use cfgschema::{CompileError, Compiler, CompilerSettings, Entry, Role};
use indoc::indoc;
use pretty_assertions::assert_eq;

/// Joins rendered lines, keeping their absolute indentation.
fn block(lines: &[&str]) -> String {
    let mut text = lines.join("\n");
    text.push('\n');
    text
}

#[test]
fn test_board_sample_layout() {
    ensure_env_logger_initialized();
    let output = Compiler::default().compile_path(board_sample()).unwrap();

    assert!(output.diagnostics.is_empty(), "{:?}", output.diagnostics);
    assert_eq!(output.schema.size, Some(0x40));

    let placed: Vec<(String, Role, Option<u64>)> = output
        .schema
        .configs
        .iter()
        .filter_map(Entry::field)
        .filter(|f| matches!(f.role, Role::Plain | Role::Padding))
        .map(|f| (f.cname.clone(), f.role, f.offset))
        .collect();

    assert_eq!(
        placed,
        vec![
            ("CfgSignature".to_owned(), Role::Plain, Some(0x00)),
            ("HeaderLength".to_owned(), Role::Plain, Some(0x04)),
            ("CFGHDR_TMPL".to_owned(), Role::Plain, Some(0x08)),
            ("UnusedUpdSpace0".to_owned(), Role::Padding, Some(0x10)),
            ("PlatformId".to_owned(), Role::Plain, Some(0x18)),
            ("Reserved1".to_owned(), Role::Plain, Some(0x1A)),
            ("CFGHDR_TMPL".to_owned(), Role::Plain, Some(0x1C)),
            ("$STRUCT".to_owned(), Role::Plain, Some(0x24)),
            ("MemSpeed".to_owned(), Role::Plain, Some(0x25)),
            ("DqMap".to_owned(), Role::Plain, Some(0x27)),
            ("CFGHDR_TMPL".to_owned(), Role::Plain, Some(0x2F)),
            ("GPIO_TMPL".to_owned(), Role::Plain, Some(0x37)),
            ("GPIO_TMPL".to_owned(), Role::Plain, Some(0x3B)),
            ("CfgEnd".to_owned(), Role::Plain, Some(0x3F)),
        ]
    );
}

#[test]
fn test_offsets_are_monotonic_and_contiguous() {
    ensure_env_logger_initialized();
    let output = Compiler::default().compile_path(board_sample()).unwrap();

    let mut expected = 0;
    for field in output
        .schema
        .configs
        .iter()
        .filter_map(Entry::field)
        .filter(|f| matches!(f.role, Role::Plain | Role::Padding))
    {
        assert_eq!(field.offset, Some(expected), "offset of `{}`", field.cname);
        expected += field.length.fixed().unwrap();
    }
    assert_eq!(output.schema.size, Some(expected));
}

#[test]
fn test_bit_members_take_their_bits_from_the_container() {
    ensure_env_logger_initialized();
    let output = Compiler::default().compile_path(board_sample()).unwrap();

    let members: Vec<(&str, Option<u32>, Option<&str>)> = output
        .schema
        .configs
        .iter()
        .filter_map(Entry::field)
        .filter(|f| f.role == Role::BitField)
        .map(|f| (f.cname.as_str(), f.bit_offset, f.value.as_deref()))
        .collect();

    assert_eq!(
        members,
        vec![
            ("EccEnable", Some(0), Some("0x0")),
            ("ChannelMode", Some(1), Some("0x5")),
            ("RsvdBits", Some(4), Some("0x5")),
        ]
    );
}

#[test]
fn test_board_sample_renders_inline() {
    ensure_env_logger_initialized();
    let output = Compiler::default().compile_path(board_sample()).unwrap();

    assert_eq!(output.documents.len(), 1);
    assert_eq!(output.top_level().file, "CfgDataDef.yaml");

    let text = output.top_level().text();
    assert!(text.starts_with("## @file\n"));
    assert!(text.contains(indoc! {"
        variable:
          PLATFORM_ID_SEL                : 0x1
          ENABLE_FAST_BOOT               : 1
          CFG_REGION                     : CfgRegion
    "}));
    assert!(text.contains(&block(&[
        "  GPIO_TMPL: >",
        "    - GpioConfPad0_$(1) :",
        "        name         : GPIO $(1) Config",
        "        type         : EditNum, HEX, (0x00000000,0xFFFFFFFF)",
        "        help         : Configuration for pad $(1)",
        "        length       : 0x04",
        "        value        : $(2)",
    ])));
    assert!(text.contains(&block(&[
        "  - PLATFORMID_CFG_DATA :",
        "    - !expand { CFGHDR_TMPL : [ PLATFORMID_CFG_DATA, 0x0F0, 0, 0 ] }",
        "    - UnusedUpdSpace0 :",
        "        type         : Reserved",
        "        length       : 0x08",
        "        value        : 0",
        "    - PlatformId :",
        "        name         : Platform ID",
        "        type         : EditNum, HEX, (0x00,0xFF)",
        "        page         : PLT",
        "        option       : 0:Default, 1:Alt",
        "        condition    : $ENABLE_FAST_BOOT == 1",
        "        help         : >",
        "          Platform ID used to select the board",
        "          configuration at boot",
        "        length       : 0x02",
        "        value        : 0x0001",
    ])));
    assert!(text.contains(&block(&[
        "    - MemFlags :",
        "      - $STRUCT :",
        "          name         : Memory Flags",
        "          type         : Reserved",
        "          page         : MEM",
        "          length       : 0x01",
        "          value        : 0x5A",
        "      - EccEnable :",
        "          name         : Enable ECC",
        "          type         : Combo",
        "          option       : 0:Disabled, 1:Enabled",
        "          length       : 1b",
        "          value        : 0x0",
    ])));
    assert!(text.contains("        value        : {0x0001, 0x0203, 0x0405, 0x0607}:WORD\n"));
    assert!(text.contains("    - !expand { GPIO_TMPL : [ GPP_A1, 0x00000002 ] }\n"));
}

#[test]
fn test_board_sample_with_satellites() {
    ensure_env_logger_initialized();
    let compiler = Compiler::new(CompilerSettings::new().emit_all(true));
    let output = compiler.compile_path(board_sample()).unwrap();

    let files: Vec<&str> = output.documents.iter().map(|d| d.file.as_str()).collect();
    assert_eq!(
        files,
        vec!["CfgDataDef.yaml", "Template_Gpio.yaml", "CfgData_Gpio.yaml"]
    );

    let top = output.documents[0].text();
    assert!(top.contains("template:\n  CFGHDR_TMPL: >\n"));
    assert!(top.contains("  !include Template_Gpio.yaml\n"));
    assert!(top.contains("  - !include CfgData_Gpio.yaml\n"));
    assert!(!top.contains("GPIO_TMPL: >"));
    assert!(!top.contains("GPIO_CFG_DATA"));

    let templates = output.documents[1].text();
    assert!(templates.starts_with("## @file\n"));
    assert!(templates.contains("\nGPIO_TMPL: >\n  - GpioConfPad0_$(1) :\n"));

    let gpio = output.documents[2].text();
    assert!(gpio.contains(indoc! {"
        - GPIO_CFG_DATA :
          - !expand { CFGHDR_TMPL : [ GPIO_CFG_DATA, 0x400, 0, 0 ] }
          - !expand { GPIO_TMPL : [ GPP_A0, 0x00000001 ] }
          - !expand { GPIO_TMPL : [ GPP_A1, 0x00000002 ] }
    "}));
}

#[test]
fn test_compilation_is_deterministic() {
    ensure_env_logger_initialized();
    let compiler = Compiler::new(CompilerSettings::new().emit_all(true));
    let first = compiler.compile_path(board_sample()).unwrap();
    let second = compiler.compile_path(board_sample()).unwrap();
    assert_eq!(first.documents, second.documents);
}

#[test]
fn test_offset_regression_aborts() {
    ensure_env_logger_initialized();
    let err = Compiler::default()
        .compile_path(sample_with_offset_regression())
        .unwrap_err();

    match err {
        CompileError::OffsetRegression {
            line,
            name,
            offset,
            cursor,
        } => {
            assert_eq!(line, 3);
            assert_eq!(name, "Second");
            assert_eq!(offset, 0x10);
            assert_eq!(cursor, 0x20);
        }
        other => panic!("expected an offset regression, got {other:?}"),
    }
}

#[test]
fn test_unterminated_template_aborts() {
    ensure_env_logger_initialized();
    let err = Compiler::default()
        .compile_path(sample_with_unterminated_template())
        .unwrap_err();
    assert!(matches!(
        err,
        CompileError::UnterminatedTemplate { line: 2, ref name } if name == "OPEN_TMPL"
    ));
}

#[test]
fn test_unknown_template_aborts() {
    ensure_env_logger_initialized();
    let err = Compiler::default()
        .compile_path(sample_with_unknown_template())
        .unwrap_err();
    assert!(matches!(
        err,
        CompileError::UnknownTemplateReference { line: 3, ref name } if name == "MISSING_TMPL"
    ));
}

#[test]
fn test_unsupported_sources_are_rejected_before_parsing() {
    let err = Compiler::default()
        .compile_path(samples_dir().join("CfgDataDef.yaml"))
        .unwrap_err();
    assert!(matches!(err, CompileError::UnsupportedSourceFormat { .. }));

    let err = Compiler::default()
        .compile_str("cfg.dsc", "gCfgData.A | * | 1 | 0\n")
        .unwrap_err();
    assert!(matches!(err, CompileError::UnsupportedSourceFormat { .. }));
}

#[test]
fn test_header_structure_is_moved_in_front() {
    ensure_env_logger_initialized();
    let source = indoc! {"
        [PcdsDynamicVpd.Tmp]
          # !BSF DEFT:{CFGHDR_TMPL:START}
            gCfgData.CfgHeader_$(1) | * | 0x04 | $(2)
          # !BSF DEFT:{CFGHDR_TMPL:END}

        [PcdsDynamicVpd.Upd]
          # !HDR EMBED:{SILICON_CFG_DATA:START}
          # !HDR EMBED:{CFGHDR_SILICON:TAG_300:START}
          # !BSF SUBT:{CFGHDR_TMPL:SILICON_CFG_DATA:TAG}
          # !HDR EMBED:{CFGHDR_SILICON:TAG_300:END}
          gCfgData.SiliconMode | * | 0x01 | 0
          # !HDR EMBED:{SILICON_CFG_DATA:END}
    "};
    let output = Compiler::default().compile_str("silicon.dsc", source).unwrap();

    let opens: Vec<(&str, Option<u32>)> = output
        .schema
        .configs
        .iter()
        .filter_map(Entry::field)
        .filter(|f| f.role == Role::StructOpen)
        .map(|f| (f.cname.as_str(), f.tag))
        .collect();
    assert_eq!(
        opens,
        vec![("CFGHDR_SILICON", Some(0x300)), ("SILICON_CFG_DATA", Some(0x300))]
    );
    assert_eq!(output.schema.size, Some(5));

    let text = output.top_level().text();
    assert!(
        text.ends_with(&block(&[
            "  - CFGHDR_SILICON :",
            "    - !expand { CFGHDR_TMPL : [ SILICON_CFG_DATA, 0x300 ] }",
            "  - SILICON_CFG_DATA :",
            "    - SiliconMode :",
            "        length       : 0x01",
            "        value        : 0",
        ])),
        "{text}"
    );
}
