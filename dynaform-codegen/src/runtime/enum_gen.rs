use dynaform::schema::{EnumType, IntermediateRepresentation};
use proc_macro2::TokenStream;
use quote::quote;

use crate::type_utils::{enum_variant_ident, type_ident};

/// Generate every schema enum that a model field uses.
pub fn generate_enums(ir: &IntermediateRepresentation) -> TokenStream {
    let mut tokens = TokenStream::new();

    for enum_type in &ir.enums {
        tokens.extend(generate_enum(enum_type));
    }

    tokens
}

/// Generate an enum with its wire conversions. The first value is the
/// default.
fn generate_enum(enum_type: &EnumType) -> TokenStream {
    let type_name = &enum_type.type_name;
    let type_ident = type_ident(type_name);

    let variants: Vec<_> = enum_type
        .values
        .iter()
        .map(|v| enum_variant_ident(v))
        .collect();
    let values = &enum_type.values;

    let default_impl = variants.first().map(|first| {
        quote! {
            impl Default for #type_ident {
                fn default() -> Self {
                    Self::#first
                }
            }
        }
    });

    quote! {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
        pub enum #type_ident {
            #(
                #[serde(rename = #values)]
                #variants
            ),*
        }

        #default_impl

        impl #type_ident {
            pub const ALL: &'static [Self] = &[#(Self::#variants),*];

            pub fn as_str(&self) -> &'static str {
                match self {
                    #(Self::#variants => #values),*
                }
            }
        }

        impl dynaform::wire::ToAttribute for #type_ident {
            fn to_attribute(&self) -> Option<dynaform::wire::AttributeValue> {
                Some(dynaform::wire::AttributeValue::S(self.as_str().to_string()))
            }
        }

        impl dynaform::wire::FromAttribute for #type_ident {
            fn from_attribute(value: &dynaform::wire::AttributeValue) -> Result<Self, String> {
                match value.as_s() {
                    #(Some(#values) => Ok(Self::#variants),)*
                    Some(other) => Err(format!("unknown {} value `{}`", #type_name, other)),
                    None => Err(format!("expected a {} string", #type_name)),
                }
            }
        }
    }
}
