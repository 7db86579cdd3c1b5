//! 核心宏定义
//!
//! 提供统一的宏来减少配置结构体中的样板代码

/// 为结构体实现Default trait的宏
///
/// 使用示例:
/// ```rust
/// use cascade::impl_default;
///
/// struct Limits {
///     min_width: u32,
///     label: String,
/// }
///
/// impl_default!(Limits {
///     min_width: 200,
///     label: String::new(),
/// });
///
/// assert_eq!(Limits::default().min_width, 200);
/// ```
#[macro_export]
macro_rules! impl_default {
    ($struct_name:ident {
        $($field:ident: $value:expr),* $(,)?
    }) => {
        impl Default for $struct_name {
            fn default() -> Self {
                Self {
                    $($field: $value),*
                }
            }
        }
    };
}
