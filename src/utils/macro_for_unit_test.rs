/*
 * @Description  : 单元测试用的断言宏
 *
 * 层的setup、reshape、反向以及Net的构建和参数读写都返回`Result<_, LayerError>`，
 * 测试里用`assert_err!`按需要的粒度核对错误；张量构造等误用会直接panic（消息为`TensorError`），
 * 用`assert_panic!`核对panic消息。
 */

/// 核对`Result`是否为指定的`LayerError`：
/// - `assert_err!(expr)`：只要求是Err；
/// - `assert_err!(expr, LayerError::Variant("消息"))`：String变体的消息须完全一致；
/// - `assert_err!(expr, LayerError::ShapeMismatch([期望形状], [实际形状], "消息"))`；
/// - `assert_err!(expr, 模式)`或`assert_err!(expr, 模式 if 条件)`：只核对变体或部分字段。
///
/// ```ignore
/// assert_err!(
///     LayerEnum::create(&param),
///     LayerError::InvalidParameter("Eltwise层只有Sum运算支持系数")
/// );
/// assert_err!(
///     net.share_trained_layers_with(&train),
///     LayerError::ParamCountMismatch { expected: 2, got: 1, .. }
/// );
/// assert_err!(net.load_params(&path), LayerError::InvalidParamsFile(_));
/// ```
#[macro_export]
macro_rules! assert_err {
    // 只验证是 Err
    ($expr:expr) => {
        assert!($expr.is_err(), "预期 Err，实际得到 {:?}", $expr);
    };
    // 简洁语法：Variant(字符串字面量) - 精确匹配 String 内容
    ($expr:expr, $err_type:ident :: $variant:ident ( $expected:literal )) => {
        match &$expr {
            Err($err_type::$variant(actual)) => assert_eq!(
                actual, $expected,
                "错误消息不匹配：预期 `{}`，实际得到 `{}`",
                $expected, actual
            ),
            Err(e) => panic!(
                "错误类型不匹配：预期 `{}::{}`，实际得到 `{:?}`",
                stringify!($err_type), stringify!($variant), e
            ),
            Ok(v) => panic!(
                "预期 Err({}::{})，实际得到 Ok({:?})",
                stringify!($err_type), stringify!($variant), v
            ),
        }
    };
    // 简洁语法：ShapeMismatch(expected, got, message)
    ($expr:expr, $err_type:ident :: ShapeMismatch ( $exp:expr, $got:expr, $msg:expr )) => {
        match &$expr {
            Err($err_type::ShapeMismatch { expected, got, message }) => {
                assert_eq!(expected.as_slice(), &$exp, "expected 不匹配");
                assert_eq!(got.as_slice(), &$got, "got 不匹配");
                assert_eq!(message, $msg, "message 不匹配");
            }
            Err(e) => panic!(
                "错误类型不匹配：预期 `{}::ShapeMismatch`，实际得到 `{:?}`",
                stringify!($err_type), e
            ),
            Ok(v) => panic!(
                "预期 Err({}::ShapeMismatch)，实际得到 Ok({:?})",
                stringify!($err_type), v
            ),
        }
    };
    // 通用模式匹配（带 if guard 或复杂 pattern）
    ($expr:expr, $($pattern:tt)+) => {
        match &$expr {
            Err(e) => assert!(
                matches!(e, $($pattern)+),
                "错误类型不匹配：预期 `{}`，实际得到 `{:?}`",
                stringify!($($pattern)+),
                e
            ),
            Ok(v) => panic!(
                "预期 Err 匹配 `{}`，实际得到 Ok({:?})",
                stringify!($($pattern)+),
                v
            ),
        }
    };
}

#[macro_export]
macro_rules! assert_panic {
    ($expr:expr) => {
        match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| $expr)) {
            Ok(_) => panic!("表达式没有触发panic"),
            Err(_) => (),
        }
    };
    ($expr:expr, $expected_msg:expr) => {
        match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| $expr)) {
            Ok(_) => panic!("表达式没有触发panic"),
            Err(err) => {
                let expected_msg_str = $expected_msg.to_string();
                if let Some(msg) = err.downcast_ref::<&'static str>() {
                    assert_eq!(*msg, expected_msg_str, "panic消息与预期不符");
                } else if let Some(msg) = err.downcast_ref::<String>() {
                    assert_eq!(*msg, expected_msg_str, "panic消息与预期不符");
                } else {
                    panic!(
                        "未找到预期的panic消息，预期的panic消息为: {}",
                        expected_msg_str
                    );
                }
            }
        }
    };
}
