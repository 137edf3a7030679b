use bytes::Bytes;
use qdb::core::QdbError;
use qdb::core::commands::command_trait::ParseCommand;
use qdb::core::commands::string::{Set, SetCondition};

fn args(parts: &[&'static str]) -> Vec<Bytes> {
    parts.iter().map(|p| Bytes::from_static(p.as_bytes())).collect()
}

#[tokio::test]
async fn test_set_parse_valid() {
    let cmd = Set::parse(&args(&["mykey", "myvalue"])).unwrap();
    assert_eq!(cmd.key, Bytes::from_static(b"mykey"));
    assert_eq!(cmd.value, Bytes::from_static(b"myvalue"));
    assert_eq!(cmd.condition, SetCondition::Always);
}

#[tokio::test]
async fn test_set_parse_conditions() {
    let nx = Set::parse(&args(&["k", "v", "nx"])).unwrap();
    assert_eq!(nx.condition, SetCondition::IfNotExists);
    let xx = Set::parse(&args(&["k", "v", "PX", "100", "XX"])).unwrap();
    assert_eq!(xx.condition, SetCondition::IfExists);
}

#[tokio::test]
async fn test_set_parse_conflicting_options() {
    assert_eq!(
        Set::parse(&args(&["k", "v", "NX", "XX"])).unwrap_err(),
        QdbError::SyntaxError
    );
    assert_eq!(
        Set::parse(&args(&["k", "v", "EX", "1", "PX", "1"])).unwrap_err(),
        QdbError::SyntaxError
    );
}

#[tokio::test]
async fn test_set_parse_missing_expire_value() {
    assert_eq!(
        Set::parse(&args(&["k", "v", "EX"])).unwrap_err(),
        QdbError::SyntaxError
    );
    assert_eq!(
        Set::parse(&args(&["k", "v", "EX", "soon"])).unwrap_err(),
        QdbError::NotAnInteger
    );
}

#[tokio::test]
async fn test_set_parse_too_few_args() {
    let err = Set::parse(&args(&["mykey"])).unwrap_err();
    assert!(format!("{:?}", err).contains("WrongArgumentCount"));
}
