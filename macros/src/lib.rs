//! Augment the testing of identity-exchange observers with procedural macros.

use proc_macro::TokenStream;
use proc_macro2::Span;
use quote::quote;
use syn::{parse_macro_input, Ident, ItemFn, LitStr};

/// Levels accepted by [macro@test_traced].
const LEVELS: [&str; 5] = ["TRACE", "DEBUG", "INFO", "WARN", "ERROR"];

/// Run a test function with a [tracing] subscriber installed at the given level
/// (defaulting to `DEBUG`).
///
/// Output is captured by the test harness (`with_test_writer`), so logs only appear
/// for failing tests or when running with `--nocapture`.
///
/// When the annotated function is `async`, it is driven to completion on a
/// current-thread `tokio` runtime (with time enabled). Any task spawned by the test
/// runs on the same thread and only makes progress when the test body awaits a
/// pending future. The crate using this attribute must depend on `tracing`,
/// `tracing-subscriber`, and (for async tests) `tokio`.
///
/// # Example
///
/// ```rust,ignore
/// use idex_macros::test_traced;
///
/// #[test_traced("INFO")]
/// async fn test_delivery() {
///     tracing::info!("delivered");
/// }
/// ```
#[proc_macro_attribute]
pub fn test_traced(attr: TokenStream, item: TokenStream) -> TokenStream {
    // Parse the input tokens into a syntax tree
    let input = parse_macro_input!(item as ItemFn);

    // Parse the level (if provided)
    let level = if attr.is_empty() {
        "DEBUG".to_string()
    } else {
        let literal = parse_macro_input!(attr as LitStr);
        let level = literal.value().to_uppercase();
        if !LEVELS.contains(&level.as_str()) {
            return syn::Error::new(
                literal.span(),
                format!("invalid level `{}`; expected one of {:?}", level, LEVELS),
            )
            .to_compile_error()
            .into();
        }
        level
    };
    let level = Ident::new(&level, Span::call_site());

    // Extract function components
    let attrs = &input.attrs;
    let vis = &input.vis;
    let name = &input.sig.ident;
    let output = &input.sig.output;
    let block = &input.block;

    // Drive async bodies on a runtime, call sync bodies directly
    let body = if input.sig.asyncness.is_some() {
        quote! {
            ::tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .expect("failed to build runtime")
                .block_on(async move #block)
        }
    } else {
        quote! { #block }
    };

    let expanded = quote! {
        #[test]
        #(#attrs)*
        #vis fn #name() #output {
            // Create a subscriber that writes to the test output
            let subscriber = ::tracing_subscriber::fmt()
                .with_test_writer()
                .with_max_level(::tracing::Level::#level)
                .with_line_number(true)
                .finish();

            // Scope the subscriber to this test
            let dispatcher = ::tracing::Dispatch::new(subscriber);
            ::tracing::dispatcher::with_default(&dispatcher, || #body)
        }
    };
    TokenStream::from(expanded)
}
