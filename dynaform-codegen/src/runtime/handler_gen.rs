use dynaform::schema::{CdcKind, ChangeDataCaptureConfig};
use proc_macro2::TokenStream;
use quote::{format_ident, quote};

use crate::type_utils::{handler_struct_name, type_ident};

/// Generate a handler skeleton for one CDC config. The skeleton implements
/// the matching capability and forwards broker events to the consumer
/// wrapper.
pub fn generate_handler(config: &ChangeDataCaptureConfig) -> TokenStream {
    let handler_ident = format_ident!("{}", handler_struct_name(&config.handler_name));
    let source_ident = type_ident(&config.source_model_name);
    let target_ident = config.target_model_name.as_deref().map(type_ident);
    let doc_comment = format!(
        " {} for `{}` {} changes.",
        config.kind.as_str().to_lowercase(),
        config.source_model_name,
        config.event.as_str()
    );

    let capability = match (config.kind, target_ident) {
        (CdcKind::Reactor, _) => quote! {
            impl Reactor for #handler_ident {
                type Source = #source_ident;

                fn react(
                    &self,
                    _ctx: &RuntimeContext,
                    _change: &ChangeRecord<#source_ident>,
                ) -> dynaform::Result<()> {
                    Ok(())
                }
            }

            pub fn handle(ctx: &RuntimeContext, event: &BrokerEvent) -> dynaform::Result<()> {
                consumer::react(ctx, &#handler_ident, event)
            }
        },
        (CdcKind::Enricher, Some(target_ident)) => quote! {
            impl Enricher for #handler_ident {
                type Source = #source_ident;
                type Target = #target_ident;

                fn enrich(
                    &self,
                    _ctx: &RuntimeContext,
                    _change: &ChangeRecord<#source_ident>,
                ) -> dynaform::Result<Option<#target_ident>> {
                    Ok(None)
                }
            }

            pub fn handle(ctx: &RuntimeContext, event: &BrokerEvent) -> dynaform::Result<()> {
                consumer::enrich(ctx, &#handler_ident, event)
            }
        },
        (CdcKind::Reducer, Some(target_ident)) => {
            quote! {
                impl Reducer for #handler_ident {
                    type Source = #source_ident;
                    type Target = #target_ident;

                    /// TODO: copy the summary's key fields from `change`. They
                    /// select which stored summary is loaded and folded into.
                    fn initial(
                        &self,
                        _change: &ChangeRecord<#source_ident>,
                    ) -> dynaform::Result<#target_ident> {
                        Ok(#target_ident::default())
                    }

                    fn reduce(
                        &self,
                        current: #target_ident,
                        _change: &ChangeRecord<#source_ident>,
                    ) -> dynaform::Result<#target_ident> {
                        Ok(current)
                    }
                }

                pub fn handle(ctx: &RuntimeContext, event: &BrokerEvent) -> dynaform::Result<()> {
                    consumer::reduce(ctx, &#handler_ident, event)
                }
            }
        }
        // The IR builder guarantees a target for enrichers and reducers.
        (_, None) => TokenStream::new(),
    };

    let trait_ident = match config.kind {
        CdcKind::Reactor => format_ident!("Reactor"),
        CdcKind::Enricher => format_ident!("Enricher"),
        CdcKind::Reducer => format_ident!("Reducer"),
    };
    let target_import = config
        .target_model_name
        .as_deref()
        .filter(|t| *t != config.source_model_name)
        .map(|t| {
            let ident = type_ident(t);
            quote! { use crate::models::#ident; }
        });

    quote! {
        use crate::models::#source_ident;
        #target_import
        use dynaform::cdc::consumer::{self, BrokerEvent, ChangeRecord};
        use dynaform::cdc::{#trait_ident, RuntimeContext};

        #[doc = #doc_comment]
        pub struct #handler_ident;

        #capability
    }
}
