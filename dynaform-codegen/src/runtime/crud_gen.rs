use dynaform::schema::{IntermediateRepresentation, Model};
use heck::ToSnakeCase;
use proc_macro2::TokenStream;
use quote::{format_ident, quote};

use super::model_gen::key_fields;
use crate::type_utils::{safe_field_ident, type_ident};

/// Generate the `StoreExt` trait with typed CRUD methods for every model.
/// Ledger models get no update method.
pub fn generate_store_ext(ir: &IntermediateRepresentation) -> TokenStream {
    let mut trait_methods = Vec::new();
    let mut impl_methods = Vec::new();

    for model in &ir.models {
        let (signatures, bodies) = model_methods(model);
        trait_methods.extend(signatures);
        impl_methods.extend(bodies);
    }

    quote! {
        /// Typed CRUD for every model in the schema.
        pub trait StoreExt {
            #(#trait_methods)*
        }

        impl StoreExt for dynaform::Store {
            #(#impl_methods)*
        }
    }
}

fn key_params(model: &Model) -> (Vec<TokenStream>, Vec<proc_macro2::Ident>) {
    let idents: Vec<_> = key_fields(model)
        .into_iter()
        .map(safe_field_ident)
        .collect();
    let params = idents
        .iter()
        .map(|ident| quote! { #ident: &(impl dynaform::wire::ToAttribute + ?Sized) })
        .collect();
    (params, idents)
}

fn model_methods(model: &Model) -> (Vec<TokenStream>, Vec<TokenStream>) {
    let struct_ident = type_ident(&model.type_name);
    let snake = model.type_name.to_snake_case();
    let create = format_ident!("create_{}", snake);
    let get = format_ident!("get_{}", snake);
    let find = format_ident!("find_{}", snake);
    let update = format_ident!("update_{}", snake);
    let delete = format_ident!("delete_{}", snake);
    let (params, args) = key_params(model);

    let mut signatures = vec![
        quote! { fn #create(&self, record: #struct_ident) -> dynaform::Result<#struct_ident>; },
        quote! { fn #get(&self, #(#params),*) -> dynaform::Result<#struct_ident>; },
        quote! { fn #find(&self, #(#params),*) -> dynaform::Result<Option<#struct_ident>>; },
        quote! { fn #delete(&self, #(#params),*) -> dynaform::Result<#struct_ident>; },
    ];
    let mut bodies = vec![
        quote! {
            fn #create(&self, record: #struct_ident) -> dynaform::Result<#struct_ident> {
                self.create(record)
            }
        },
        quote! {
            fn #get(&self, #(#params),*) -> dynaform::Result<#struct_ident> {
                self.get(&#struct_ident::key_of(#(#args),*))
            }
        },
        quote! {
            fn #find(&self, #(#params),*) -> dynaform::Result<Option<#struct_ident>> {
                self.find(&#struct_ident::key_of(#(#args),*))
            }
        },
        quote! {
            fn #delete(&self, #(#params),*) -> dynaform::Result<#struct_ident> {
                self.delete(&#struct_ident::key_of(#(#args),*))
            }
        },
    ];

    if !model.is_ledger {
        signatures.push(
            quote! { fn #update(&self, record: #struct_ident) -> dynaform::Result<#struct_ident>; },
        );
        bodies.push(quote! {
            fn #update(&self, record: #struct_ident) -> dynaform::Result<#struct_ident> {
                self.update(record)
            }
        });
    }

    (signatures, bodies)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dynaform::config::CompilerConfig;
    use dynaform::schema::parse_schema_str;

    const SCHEMA: &str = r#"
type Payment @partitionKey(pkFields: ["paymentId"]) @ledger {
  paymentId: ID!
  amount: Float!
}

type Invoice @compositeKey(pkFields: ["customerId"], pkPrefix: "C", skFields: ["invoiceId"]) {
  customerId: ID!
  invoiceId: ID!
}
"#;

    #[test]
    fn test_store_ext_methods() {
        let ir = parse_schema_str(SCHEMA, &CompilerConfig::default()).unwrap();
        let code = generate_store_ext(&ir).to_string();

        assert!(code.contains("pub trait StoreExt"));
        assert!(code.contains("fn create_invoice"));
        assert!(code.contains("fn update_invoice"));
        assert!(code.contains("fn get_invoice (& self , customer_id"));
        assert!(code.contains("fn create_payment"));
        assert!(code.contains("fn delete_payment"));
        assert!(!code.contains("fn update_payment"), "ledger models are append-only");
        assert!(syn::parse2::<syn::File>(generate_store_ext(&ir)).is_ok());
    }
}
